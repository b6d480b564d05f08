use clap::{Parser, Subcommand};
use client::network::{Client, ClientError};
use log::info;
use shared::{now_millis, Packet, GRID_SIZE};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, env = "PIXEL_SERVER", default_value = "127.0.0.1:8080")]
    server: String,

    /// Account name
    #[arg(short = 'u', long, env = "PIXEL_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(short = 'p', long, env = "PIXEL_PASSWORD")]
    password: Option<String>,

    /// Create the account instead of logging in
    #[arg(long)]
    register: bool,

    /// Canvas size, must match the server
    #[arg(long, default_value_t = GRID_SIZE)]
    grid_size: u16,

    /// Milliseconds to wait for a reply
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the canvas and print live updates
    Watch,
    /// Place one pixel
    Place { x: f64, y: f64, color: String },
    /// Add a color to the account's palette
    Color { color: String },
    /// Show the account summary
    Me,
    /// Clear the canvas and all accounts (admin only)
    Purge,
}

async fn execute(client: &mut Client, args: &Args) -> Result<(), ClientError> {
    client.connect().await?;

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        let name = if args.register {
            client.register(username, password).await?
        } else {
            client.login(username, password).await?
        };
        info!("Authenticated as {}", name);
    }

    match &args.command {
        Command::Watch => {
            client.sync_canvas().await?;
            println!("{} painted cells", client.canvas.painted());
            client
                .watch(|client, packet| match packet {
                    Packet::PixelUpdate {
                        x, y, color, user, ..
                    } => println!("({}, {}) {} by {}", x, y, color, user),
                    Packet::Purged => println!("canvas purged"),
                    Packet::TurnsUpdate { .. } | Packet::Cooldown { .. } => {
                        if let Some(budget) = client.budget {
                            println!("budget: {}", budget.describe(now_millis()));
                        }
                    }
                    _ => {}
                })
                .await?;
        }
        Command::Place { x, y, color } => {
            client.place(*x, *y, color).await?;
            println!("placed {} at ({}, {})", color, x, y);
            let account = client.me().await?;
            if let Some(budget) = client.budget {
                println!("budget: {}", budget.describe(now_millis()));
            }
            println!("{} pixels placed", account.pixels_placed);
        }
        Command::Color { color } => {
            let colors = client.save_color(color).await?;
            println!("palette: {}", colors.join(" "));
        }
        Command::Me => {
            let account = client.me().await?;
            println!("user: {}", account.username);
            println!("pixels placed: {}", account.pixels_placed);
            match client.budget {
                Some(budget) => println!("budget: {}", budget.describe(now_millis())),
                None => println!("budget: unlimited"),
            }
            println!("palette: {}", account.custom_colors.join(" "));
        }
        Command::Purge => {
            client.purge().await?;
            println!("canvas purged");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let mut client = Client::new(
        &args.server,
        args.grid_size,
        Duration::from_millis(args.timeout_ms),
    )
    .await?;

    let result = tokio::select! {
        result = execute(&mut client, &args) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    client.disconnect().await?;
    result?;
    Ok(())
}
