use anyhow::{self, Context};
use serde::Deserialize;
use std::path::Path;

use crate::activation::ActivationContext;

/// 配置中登记的一个类
#[derive(Deserialize, Debug, Clone)]
pub struct ClassConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: String,
    /// 规范文本形式, 花括号可选
    pub clsid: String,
    #[serde(default)]
    pub context: ActivationContext,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_read_size() -> u32 {
    1024
}

#[derive(Deserialize, Debug)]
pub struct StreamConfig {
    /// roundtrip 一次读取的字节数
    #[serde(default = "default_read_size")]
    pub read_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_size: default_read_size(),
        }
    }
}

/// 主配置 (profile/config.toml)
#[derive(Deserialize, Debug)]
pub struct CombindConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
}

impl CombindConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<CombindConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", &path.as_ref().as_os_str()))?;
        Self::parse(&toml_str).with_context(|| format!("无法解析配置文件: {:?}", &path.as_ref().as_os_str()))
    }

    pub fn parse(toml_str: &str) -> anyhow::Result<CombindConfig> {
        let config: CombindConfig = toml::from_str(toml_str)?;
        anyhow::Ok(config)
    }
}
