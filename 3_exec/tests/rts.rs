use digit_layout::types as dt;
use exec::{DevPtr, Device, Exec, ExecError, ExecutionContext, RtsTask};
use graph::{OpDesc, ty};
use tensor::TensorDesc;
use test_rt::TestDevice;

const STREAM: u32 = 0;
const N: usize = 8;

fn exec(op: OpDesc, inputs: &[DevPtr], outputs: &[DevPtr]) -> Exec<DevPtr> {
    Exec {
        node: op,
        task_id: 0,
        stream_id: STREAM,
        inputs: inputs.into(),
        outputs: outputs.into(),
    }
}

#[test]
fn test_load() {
    assert_eq!(RtsTask::load(ty::IDENTITY), Ok(RtsTask::Identity));
    assert_eq!(RtsTask::load(ty::IDENTITY_N), Ok(RtsTask::IdentityN));
    assert_eq!(
        RtsTask::load("MatMul"),
        Err(ExecError::Unsupported("MatMul".into()))
    );
}

#[test]
fn test_identity() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dev = TestDevice::new();
    let ctx = ExecutionContext::new(&dev);
    let desc = TensorDesc::new(dt::U8, [N]);
    let x = dev.alloc(N).unwrap();
    let y = dev.alloc(N).unwrap();
    dev.write(x, b"identity");

    let op = OpDesc::new("i", ty::IDENTITY)
        .input("x", desc.clone())
        .output("y", desc);
    RtsTask::load(op.ty())
        .unwrap()
        .execute(&ctx, STREAM, &exec(op, &[x], &[y]))
        .unwrap();
    assert_eq!(dev.read(y, N), b"identity");
}

#[test]
fn test_identity_n() {
    let dev = TestDevice::new();
    let ctx = ExecutionContext::new(&dev);
    let full = TensorDesc::new(dt::U8, [N]);
    let empty = TensorDesc::new(dt::U8, [0]);
    let x0 = dev.alloc(N).unwrap();
    let x1 = dev.alloc(N).unwrap();
    let y0 = dev.alloc(N).unwrap();
    let y1 = dev.alloc(N).unwrap();
    dev.write(x0, &[7; N]);
    dev.write(x1, &[9; N]);

    let op = OpDesc::new("n", ty::IDENTITY_N)
        .input("x0", full.clone())
        .input("x1", empty.clone())
        .output("y0", full)
        .output("y1", empty);
    RtsTask::IdentityN
        .execute(&ctx, STREAM, &exec(op, &[x0, x1], &[y0, y1]))
        .unwrap();
    assert_eq!(dev.read(y0, N), [7; N]);
    // 空张量不复制
    assert_eq!(dev.read(y1, N), [0; N]);
}

#[test]
fn test_address_mismatch() {
    let dev = TestDevice::new();
    let ctx = ExecutionContext::new(&dev);
    let desc = TensorDesc::new(dt::U8, [N]);
    let op = OpDesc::new("i", ty::IDENTITY)
        .input("x", desc.clone())
        .output("y", desc);
    assert!(matches!(
        RtsTask::Identity.execute(&ctx, STREAM, &exec(op, &[], &[DevPtr::NULL])),
        Err(ExecError::ShapeOrSizeMismatch(_))
    ));
}
