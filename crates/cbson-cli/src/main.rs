use anyhow::Context;
use cbson_cli::{decode_file, encode_file, init_logging, load_config};
use cbson_codec::{DecodeOptions, EncodeOptions};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cbson")]
#[command(author = "ITSTUDIO")]
#[command(version)]
#[command(about = "cbson - convert between extended JSON and BSON documents")]
struct Args {
    #[arg(short, long, env = "CBSON_CONFIG")]
    config: Option<PathBuf>,

    /// 覆盖配置文件中的日志级别
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 扩展 JSON 文件 -> BSON 文件
    Encode {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        validate_keys: bool,

        #[arg(long)]
        promote_id: bool,
    },
    /// BSON 文件 -> 扩展 JSON
    Decode {
        input: PathBuf,

        /// 不指定时写到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())
        .with_context(|| format!("Failed to load config {:?}", args.config))?;

    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level, args.log_json || config.log.json);

    if let Some(path) = &args.config {
        info!("Loaded config from {:?}", path);
    }

    match args.command {
        Command::Encode { input, output, validate_keys, promote_id } => {
            let mut options = EncodeOptions::from(&config.codec);
            options.validate_keys |= validate_keys;
            options.promote_id |= promote_id;
            encode_file(&input, &output, &options)
                .with_context(|| format!("Failed to encode {:?}", input))?;
        }
        Command::Decode { input, output, pretty } => {
            let options = DecodeOptions::from(&config.codec);
            let text = decode_file(&input, &options, pretty)
                .with_context(|| format!("Failed to decode {:?}", input))?;
            match output {
                Some(path) => fs::write(&path, text)?,
                None => println!("{}", text),
            }
        }
    }

    Ok(())
}
