//! `oocrpc-demo` - serve the demo `Arith` service or call it.
//!
//! Settings not given on the command line come from `OOCRPC_*` environment
//! variables (see [`Config::from_env`]).

use clap::{Parser, Subcommand};
use oocrpc::demo::{Args, Arith, Reply};
use oocrpc::{Client, Config, Server};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "oocrpc-demo")]
#[command(about = "Demo server and client for oocrpc", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the `Arith` service until Ctrl-C.
    Serve {
        /// Listen address (host:port).
        #[arg(short, long, env = "OOCRPC_LISTEN_ADDR")]
        listen: Option<String>,
    },

    /// Issue one call with `{a, b}` arguments and print the reply.
    Call {
        /// Server address (host:port).
        #[arg(long, env = "OOCRPC_SERVER_ADDR")]
        addr: Option<String>,

        /// Method to call, e.g. `Arith.Add`.
        #[arg(short, long, default_value = "Arith.Add")]
        method: String,

        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        a: i64,

        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        b: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_env()?;

    // Initialize observability
    oocrpc::observability::init_tracing_with(&config.observability);

    match cli.command {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            let server = Arc::new(Server::bind(config.server).await?);
            server.register(Arith)?;

            let stopper = Arc::clone(&server);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stopper.shutdown();
                }
            });
            server.serve().await?;
        }

        Commands::Call { addr, method, a, b } => {
            if let Some(addr) = addr {
                config.client.server_addr = addr;
            }
            let client = Client::with_config(config.client);
            match client.call::<_, Reply>(&method, &Args { a, b }).await {
                Ok(reply) => println!("{} {}", method, reply.c),
                Err(e) => {
                    eprintln!("{} failed: {}", method, e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
