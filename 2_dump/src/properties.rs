use crate::DumpError;
use log::debug;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

/// 注册此模型名表示所有模型都需要 dump
pub const ALL_MODEL_NEED_DUMP: &str = "ALL_MODEL_NEED_DUMP";
/// 单次最多 dump 的步数组数
const MAX_DUMP_STEPS: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub enum DumpMode {
    Input,
    #[default]
    Output,
    All,
}

impl FromStr for DumpMode {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "all" => Ok(Self::All),
            _ => Err(DumpError::InvalidParameter(format!(
                "dump mode \"{s}\" is not one of input, output, all"
            ))),
        }
    }
}

impl fmt::Display for DumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::All => "all",
        })
    }
}

/// dump 配置：路径、步数、模式以及需要 dump 的模型和层
#[derive(Clone, Default, Debug)]
pub struct DumpProperties {
    path: String,
    step: String,
    mode: DumpMode,
    model_layers: BTreeMap<String, BTreeSet<String>>,
}

impl DumpProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// 形如 `0|5|10-20` 的步数列表
    pub fn with_step(mut self, step: &str) -> Result<Self, DumpError> {
        check_dump_step(step)?;
        self.step = step.into();
        Ok(self)
    }

    pub fn with_mode(mut self, mode: &str) -> Result<Self, DumpError> {
        self.mode = mode.parse()?;
        Ok(self)
    }

    /// 注册需要 dump 的模型，`layers` 为空时 dump 模型中的所有层
    pub fn add_model<S: Into<String>>(
        &mut self,
        model: impl Into<String>,
        layers: impl IntoIterator<Item = S>,
    ) {
        self.model_layers
            .entry(model.into())
            .or_default()
            .extend(layers.into_iter().map(Into::into))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub const fn mode(&self) -> DumpMode {
        self.mode
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.model_layers.keys().map(String::as_str)
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.model_layers.contains_key(model)
    }

    pub fn layers(&self, model: &str) -> Option<&BTreeSet<String>> {
        self.model_layers.get(model)
    }

    pub fn is_dump_enabled(&self) -> bool {
        !self.path.is_empty() && !self.model_layers.is_empty()
    }

    pub fn is_layer_need_dump(&self, model: &str, om_name: &str, op_name: &str) -> bool {
        if self.contains_model(ALL_MODEL_NEED_DUMP) {
            return true;
        }
        match self.layers(om_name).or_else(|| self.layers(model)) {
            Some(layers) => layers.is_empty() || layers.contains(op_name),
            None => {
                debug!("model {model} is not set to dump");
                false
            }
        }
    }
}

fn check_dump_step(step: &str) -> Result<(), DumpError> {
    let invalid = |reason: &str| {
        Err(DumpError::InvalidParameter(format!(
            "dump step \"{step}\" {reason}, correct example: 0|5|10|50-100"
        )))
    };

    let items = step.split('|').collect::<Vec<_>>();
    if items.len() > MAX_DUMP_STEPS {
        return invalid("has more than 100 sets");
    }
    for item in items {
        let (first, last) = match item.split_once('-') {
            Some((first, last)) => (first, Some(last)),
            None => (item, None),
        };
        let Some(first) = parse_step(first) else {
            return invalid("is malformed");
        };
        if let Some(last) = last {
            let Some(last) = parse_step(last) else {
                return invalid("is malformed");
            };
            if first >= last {
                return invalid("has a range whose first step is not less than the second");
            }
        }
    }
    Ok(())
}

fn parse_step(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        None
    } else {
        s.parse().ok()
    }
}
