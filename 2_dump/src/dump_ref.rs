/// dump 重定向指向的张量方向
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RefDir {
    Input,
    Output,
}

/// 解析 `<node>:<input|output>:<index>`，节点名本身可以包含 `:`
pub(crate) fn parse_dump_ref(s: &str) -> Option<(&str, RefDir, usize)> {
    let (rest, index) = s.rsplit_once(':')?;
    let (node, dir) = rest.rsplit_once(':')?;
    let dir = match dir {
        "input" => RefDir::Input,
        "output" => RefDir::Output,
        _ => return None,
    };
    Some((node, dir, index.parse().ok()?))
}
