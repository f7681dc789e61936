use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sideinput_api::SideInputKey;
use sideinput_engine::SideInputConfig;

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "sideinput", about = "Синхронизация side input'ов через общий mount")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить генераторы и публиковать значения в store
    Synchronize(SynchronizeArgs),
    /// Применять новые версии (consumer), зеркалируя значения в каталог
    Watch(WatchArgs),
    /// Дождаться, пока у всех ключей появится значение (init-контейнер)
    Init(InitArgs),
    /// Напечатать последние записи
    Get(GetArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "sideinput.toml", env = "SIDEINPUT_CONFIG")]
    pub config: String,

    /// Переопределить store.root
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Переопределить watch.poll_interval_ms
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct SynchronizeArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Clone, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Переопределить watch.out_dir
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Сколько ждать до ошибки
    #[arg(long, default_value_t = 120_000)]
    pub timeout_ms: u64,
}

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    /// Корень общего mount'а
    #[arg(long, env = "SIDEINPUT_ROOT")]
    pub root: PathBuf,

    /// Ключ; без него — все ключи
    pub key: Option<SideInputKey>,

    /// Печатать каждую новую версию
    #[arg(long, requires = "key")]
    pub follow: bool,

    #[arg(long, default_value_t = 1_000)]
    pub poll_interval_ms: u64,
}

impl ConfigArgs {
    /// TOML-конфиг с применёнными CLI-переопределениями.
    pub fn load(&self) -> Result<SideInputConfig, CliError> {
        let mut config = SideInputConfig::load(&self.config)?;
        if let Some(root) = &self.root {
            config.store.root = root.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.watch.poll_interval_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sideinput.toml");
        std::fs::write(&path, "[store]\nroot = \"/from-file\"\n[watch]\npoll_interval_ms = 5000\n").unwrap();

        let args = ConfigArgs {
            config: path.to_string_lossy().into_owned(),
            root: Some(PathBuf::from("/from-cli")),
            poll_interval_ms: Some(250),
        };
        let config = args.load().unwrap();
        assert_eq!(config.store.root, PathBuf::from("/from-cli"));
        assert_eq!(config.watch.poll_interval_ms, 250);
    }

    #[test]
    fn zero_poll_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sideinput.toml");
        std::fs::write(&path, "[store]\nroot = \"/mnt\"\n").unwrap();
        let args = ConfigArgs {
            config: path.to_string_lossy().into_owned(),
            root: None,
            poll_interval_ms: Some(0),
        };
        assert!(args.load().is_err());
    }

    #[test]
    fn follow_requires_key() {
        assert!(Cli::try_parse_from(["sideinput", "get", "--root", "/mnt", "--follow"]).is_err());
        let cli = Cli::try_parse_from(["sideinput", "get", "--root", "/mnt", "rate-limit", "--follow"]).unwrap();
        match cli.command {
            Commands::Get(args) => {
                assert!(args.follow);
                assert_eq!(args.key.unwrap().as_str(), "rate-limit");
            }
            _ => panic!("expected get"),
        }
    }

    #[test]
    fn invalid_key_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["sideinput", "get", "--root", "/mnt", "../etc"]).is_err());
    }
}
