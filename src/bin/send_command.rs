use clap::{Parser, ValueEnum};
use telemetry_broker::proto::{
    Command, CommandType, monitoring_service_client::MonitoringServiceClient,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CommandArg {
    Start,
    Stop,
}

impl From<CommandArg> for CommandType {
    fn from(command: CommandArg) -> Self {
        match command {
            CommandArg::Start => CommandType::Start,
            CommandArg::Stop => CommandType::Stop,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(about = "Queue a command for a monitoring agent")]
struct Args {
    /// Target agent
    #[arg(long)]
    agent_id: String,

    #[arg(long, value_enum)]
    command: CommandArg,

    /// Broker endpoint
    #[arg(long, default_value = "http://localhost:50051")]
    server: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut client = MonitoringServiceClient::connect(args.server.clone()).await?;

    let ack = client
        .send_command(Command {
            agent_id: args.agent_id,
            r#type: CommandType::from(args.command) as i32,
        })
        .await?
        .into_inner();

    println!("{}", ack.message);

    if !ack.success {
        std::process::exit(1);
    }

    Ok(())
}
