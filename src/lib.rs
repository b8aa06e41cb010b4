//! 二进制组件接口的声明式描述与调用绑定
pub mod activation;
pub mod binding;
pub mod const_values;
pub mod descriptor;
pub mod instance;
pub mod interfaces;
pub mod registry;
pub mod value;

#[cfg(test)]
mod testing;

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use activation::ClassRegistry;
use binding::BindingSet;
use const_values::CombindConfig;
use descriptor::InterfaceDescriptor;
use interfaces::{SeekOrigin, Stream};
use registry::BindingRegistry;

/// 组件接口绑定工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 配置文件地址
    #[arg(short, long, default_value = "profile/config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 打印内置接口的方法表和绑定方式
    Describe {
        #[arg(default_value = "IStream")]
        interface: String,
    },
    /// 列出配置中登记的类
    Classes,
    /// 激活内存流, 写入数据, 回卷后读回
    Roundtrip {
        #[arg(short, long, default_value = "Some data")]
        data: String,
        /// 一次读取的字节数, 默认取配置
        #[arg(short, long)]
        read_size: Option<u32>,
        /// 类名, 默认使用第一个启用的 memstream 类
        #[arg(long)]
        class: Option<String>,
    },
}

/// 相对路径按项目根目录解析
fn config_path(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(path)
    }
}

pub fn run(args: Args) -> Result<()> {
    let load_config = || CombindConfig::new(config_path(&args.config));

    match &args.command {
        Command::Describe { interface } => {
            let descriptor = interfaces::builtin(interface).with_context(|| format!("未知接口: {interface}"))?;
            let bindings = BindingRegistry::standard().bindings_for(&descriptor)?;
            print!("{}", describe(&descriptor, &bindings));
        }
        Command::Classes => {
            let classes = ClassRegistry::from_config(&load_config()?.classes)?;
            for (clsid, name, context) in classes.classes() {
                println!("{} {} {:?}", clsid.braced().bold(), name, context);
            }
        }
        Command::Roundtrip {
            data,
            read_size,
            class,
        } => {
            let config = load_config()?;
            let read_size = read_size.unwrap_or(config.stream.read_size);
            let (bytes, count) = roundtrip(&config, data.as_bytes(), read_size, class.as_deref())?;
            println!("{} {} 字节: {}", "读回".green(), count, hex::encode(&bytes));
            println!("{}", String::from_utf8_lossy(&bytes));
        }
    }
    Ok(())
}

/// 方法表文本, 每个槽位一行
pub fn describe(descriptor: &InterfaceDescriptor, bindings: &BindingSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", descriptor.name().bold(), descriptor.iid().braced());
    if let Some(base) = descriptor.base() {
        let _ = writeln!(out, "  extends {}", base.name());
    }
    for entry in descriptor.methods() {
        let params = entry
            .method
            .params()
            .iter()
            .map(|p| format!("[{}] {}: {}", p.direction(), p.name(), p.ty()))
            .collect::<Vec<_>>()
            .join(", ");
        let kind = match bindings.get(entry.method.name()) {
            _ if entry.method.is_restricted() => "restricted".dimmed(),
            Some(binding) if binding.is_overridden() => "override".yellow(),
            Some(_) => "generated".green(),
            None => "unbound".red(),
        };
        let _ = writeln!(
            out,
            "  {:>2} {}({}) {} <{}>",
            entry.slot,
            entry.method.name(),
            params,
            kind,
            entry.owner.name()
        );
    }
    out
}

/// 激活配置中的内存流类, 写入 `data` 后回卷读回
pub fn roundtrip(config: &CombindConfig, data: &[u8], read_size: u32, class: Option<&str>) -> Result<(Vec<u8>, u32)> {
    let classes = ClassRegistry::from_config(&config.classes)?;
    let clsid = match class {
        Some(name) => classes.find(name).with_context(|| format!("配置中没有启用的类 {name}"))?,
        None => config
            .classes
            .iter()
            .filter(|c| c.enabled && c.server_type == "memstream")
            .find_map(|c| classes.find(&c.name))
            .context("配置中没有启用的 memstream 类")?,
    };
    let context = classes
        .classes()
        .into_iter()
        .find(|(id, _, _)| *id == clsid)
        .map(|(_, _, context)| context)
        .unwrap_or_default();

    let bindings = BindingRegistry::standard();
    let stream = Stream::activate(&classes, &bindings, &clsid, context)?;
    let written = stream.remote_write(data)?;
    stream.commit(0)?;
    stream.remote_seek(0, SeekOrigin::Set)?;
    info!(%clsid, written, "写入完成, 回卷到开头");

    let (bytes, count) = stream.remote_read(read_size)?;
    info!(count, "读取完成");
    Ok((bytes, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CombindConfig {
        CombindConfig::new(config_path("profile/config.toml")).unwrap()
    }

    #[test]
    fn test_roundtrip_profile() {
        let (bytes, count) = roundtrip(&profile(), b"Some data", 1024, None).unwrap();
        assert_eq!(bytes, b"Some data");
        assert_eq!(count, 9);

        let (bytes, count) = roundtrip(&profile(), b"Some data", 4, Some("memory_stream")).unwrap();
        assert_eq!(bytes, b"Some");
        assert_eq!(count, 4);
    }

    #[test]
    fn test_roundtrip_disabled_class() {
        let err = roundtrip(&profile(), b"x", 1, Some("remote_memory_stream")).unwrap_err();
        assert!(err.to_string().contains("remote_memory_stream"));
    }

    #[test]
    fn test_describe_marks_bindings() {
        let descriptor = interfaces::stream();
        let bindings = BindingRegistry::standard().bindings_for(&descriptor).unwrap();
        colored::control::set_override(false);
        let text = describe(&descriptor, &bindings);
        assert!(text.contains("extends ISequentialStream"));
        assert!(text.contains(" 3 RemoteRead([out] pv: *mut u8, [in] cb: u32, [out] pcbRead: *mut u32) override <ISequentialStream>"));
        assert!(text.contains("RemoteWrite"));
        assert!(text.contains("QueryInterface"));
        assert!(text.contains("restricted"));
        assert_eq!(text.lines().count(), 2 + 12);
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["combind", "roundtrip", "-d", "hello", "-r", "3"]).unwrap();
        assert_eq!(args.config, "profile/config.toml");
        assert!(matches!(
            args.command,
            Command::Roundtrip { ref data, read_size: Some(3), class: None } if data == "hello"
        ));

        let args = Args::try_parse_from(["combind", "describe"]).unwrap();
        assert!(matches!(args.command, Command::Describe { ref interface } if interface == "IStream"));
        assert!(config_path("/abs/config.toml").is_absolute());
    }
}
