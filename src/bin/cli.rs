use mini_redis_pipeline::{clients::Client, Pipeline, QueueCommands, Transaction, DEFAULT_PORT};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::str;

#[cfg(feature = "otel")]
// 用于设置 XrayPropagator
use opentelemetry::global;
#[cfg(feature = "otel")]
// 用于配置某些选项，如采样率
use opentelemetry::sdk::trace as sdktrace;
#[cfg(feature = "otel")]
// 用于在服务之间传递相同的 XrayId
use opentelemetry_aws::trace::XrayPropagator;
#[cfg(feature = "otel")]
// `Ext` traits 用于允许 Registry 接受 OpenTelemetry 特定类型（如 `OpenTelemetryLayer`）
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "mini-redis-pipeline-cli",
    version,
    author,
    about = "Issue Redis commands, one at a time or pipelined"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(name = "hostname", long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping {
        /// 要 ping 的消息
        #[clap(value_parser = bytes_from_str)]
        msg: Option<Bytes>,
    },
    /// 获取键的值。
    Get {
        /// 要获取的键的名称
        key: String,
    },
    /// 将键设置为保存字符串值。
    Set {
        /// 要设置的键的名称
        key: String,

        /// 要设置的值。
        #[clap(value_parser = bytes_from_str)]
        value: Bytes,
    },
    /// 将键中存储的整数加一。
    Incr {
        key: String,
    },
    /// 在一次往返中发送多个命令，例如 `pipeline "SET a 1" "INCR a"`。
    Pipeline {
        /// 用 MULTI / EXEC 包裹这些命令
        #[clap(long)]
        transaction: bool,

        /// 命令，每个参数一条，单词之间用空格分隔
        #[clap(required = true)]
        commands: Vec<String>,
    },
}

/// CLI 工具的入口点。
///
/// 在这里使用 `flavor = "current_thread"` 是为了避免生成后台线程。
/// CLI 工具的使用情况更适合轻量而不是多线程。
#[tokio::main(flavor = "current_thread")]
async fn main() -> mini_redis_pipeline::Result<()> {
    set_up_logging()?;

    let cli = Cli::parse();

    // 获取要连接的远程地址
    let addr = format!("{}:{}", cli.host, cli.port);

    let mut client = Client::connect(&addr).await?;

    match cli.command {
        Command::Ping { msg } => {
            let value = client.ping(msg).await?;
            print_bytes(&value);
        }
        Command::Get { key } => {
            if let Some(value) = client.get(&key).await? {
                print_bytes(&value);
            } else {
                println!("(nil)");
            }
        }
        Command::Set { key, value } => {
            client.set(&key, value).await?;
            println!("OK");
        }
        Command::Incr { key } => {
            let value = client.incr(&key).await?;
            println!("(integer) {}", value);
        }
        Command::Pipeline {
            transaction: false,
            commands,
        } => {
            let mut pipeline = Pipeline::open(&mut client)?;
            queue_all(&mut pipeline, &mut client, commands)?;
            pipeline.flush_async(&mut client).await?;
        }
        Command::Pipeline {
            transaction: true,
            commands,
        } => {
            let mut tx = Transaction::open(&mut client)?;
            queue_all(&mut tx, &mut client, commands)?;
            if !tx.commit_async(&mut client).await? {
                println!("(aborted)");
            }
        }
    }

    Ok(())
}

/// 把每个命令排队为读取回复树，并打印返回的内容。
fn queue_all<Q: QueueCommands>(
    batch: &mut Q,
    client: &mut Client,
    commands: Vec<String>,
) -> mini_redis_pipeline::Result<()> {
    for (n, command) in commands.into_iter().enumerate() {
        let args: Vec<String> = command.split_whitespace().map(String::from).collect();
        if args.is_empty() {
            return Err(format!("command {} is empty", n + 1).into());
        }

        batch
            .queue(client, move |c| c.write_command(&args))?
            .on_data(move |frame| println!("{}) {}", n + 1, frame))
            .on_error(move |err| println!("{}) (error) {}", n + 1, err))
            .complete_data()?;
    }

    Ok(())
}

fn print_bytes(value: &Bytes) {
    if let Ok(string) = str::from_utf8(value) {
        println!("\"{}\"", string);
    } else {
        println!("{:?}", value);
    }
}

fn bytes_from_str(src: &str) -> Result<Bytes, Infallible> {
    Ok(Bytes::from(src.to_string()))
}

#[cfg(not(feature = "otel"))]
fn set_up_logging() -> mini_redis_pipeline::Result<()> {
    // 有关更多信息，请参阅 https://docs.rs/tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
}

#[cfg(feature = "otel")]
fn set_up_logging() -> mini_redis_pipeline::Result<()> {
    // 将全局传播器设置为 X-Ray 传播器
    global::set_text_map_propagator(XrayPropagator::default());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::config()
                .with_sampler(sdktrace::Sampler::AlwaysOn)
                // 为了将跟踪 ID 转换为与 Xray 兼容的格式，需要此项
                .with_id_generator(sdktrace::XrayIdGenerator::default()),
        )
        .install_simple()?;

    // 使用配置的追踪器创建一个追踪层
    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    // 从 `RUST_LOG` 环境变量中解析 `EnvFilter` 配置
    let filter = EnvFilter::from_default_env();

    // 使用追踪订阅者 `Registry` 或其他实现了 `LookupSpan` 的订阅者
    tracing_subscriber::registry()
        .with(opentelemetry)
        .with(filter)
        .with(fmt::Layer::default())
        .try_init()?;

    Ok(())
}
