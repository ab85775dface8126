use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use scrobbled::config::{Config, default_config_path, load_config, save_config};
use scrobbled::network::NetworkStatus;
use scrobbled::prefs::Prefs;
use scrobbled::queue::{NowPlayingEvent, ScrobbleEvent};
use scrobbled::transport::HttpTransport;
use scrobbled::{Command, Delivery, ScrobbleClient, Scrobbler, Session};

#[derive(Parser)]
#[command(
    name = "scrobbled",
    version,
    about = "Scrobble plays and tune radio stations"
)]
struct Cli {
    #[arg(long, value_name = "PATH", global = true)]
    config_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    Scrobbling {
        #[command(subcommand)]
        command: ToggleCommand,
    },
    /// Run both handshakes and report the session
    Login,
    Tune {
        #[arg(help = "Station URL, e.g. lastfm://artist/Autechre/similarartists")]
        station: String,
    },
    TuneUser {
        user: String,
        #[arg(help = "personal, playlist, neighbours, recommended/100, ...")]
        feature: String,
    },
    /// Tune a station and list its tracks
    Tracks { station: String },
    Friends { username: String },
    Neighbours { username: String },
    Love(RateArgs),
    Ban(RateArgs),
    NowPlaying(TrackArgs),
    /// Queue one play and send everything cached
    Submit(SubmitArgs),
    /// Send everything cached
    Flush,
    /// Write the effective configuration to the config file
    InitConfig,
}

#[derive(Subcommand)]
enum AccountCommand {
    Set {
        #[arg(long, help = "Account username")]
        username: String,
        #[arg(long, help = "Account password")]
        password: Option<String>,
    },
    Show,
    Clear,
}

#[derive(Subcommand)]
enum ToggleCommand {
    On,
    Off,
}

#[derive(Parser)]
struct RateArgs {
    #[arg(long)]
    artist: String,
    #[arg(long)]
    track: String,
}

#[derive(Parser)]
struct TrackArgs {
    #[arg(long)]
    artist: String,
    #[arg(long)]
    track: String,
    #[arg(long, default_value = "")]
    album: String,
    #[arg(long, help = "Track number on the album")]
    number: Option<u32>,
    #[arg(long, help = "Track length in seconds")]
    duration: Option<u32>,
}

#[derive(Parser)]
struct SubmitArgs {
    #[command(flatten)]
    track: TrackArgs,
    #[arg(long, help = "Unix time the play started; defaults to now")]
    started: Option<i64>,
    #[arg(long, default_value = "P", help = "Source code; only P is accepted")]
    source: String,
}

struct App {
    config_path: PathBuf,
    config: Config,
    prefs: Prefs,
}

impl App {
    fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(default_config_path);
        let config = load_config(&config_path)?;
        let prefs = Prefs::load(&config.prefs_path())?;
        Ok(Self {
            config_path,
            config,
            prefs,
        })
    }

    fn client(&self) -> Result<ScrobbleClient> {
        Ok(ScrobbleClient::new(
            &self.config,
            Arc::new(HttpTransport::new()?),
        ))
    }

    fn session(&self) -> Session {
        Session::new(self.prefs.username(), self.prefs.password_md5())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut app = App::load(cli.config_path)?;
    match cli.command {
        Commands::Account { command } => handle_account(&mut app, command)?,
        Commands::Scrobbling { command } => {
            let enabled = matches!(command, ToggleCommand::On);
            app.prefs.set_scrobble_enabled(enabled)?;
            println!("Scrobbling {}", if enabled { "enabled" } else { "disabled" });
        }
        Commands::Login => {
            let mut session = app.session();
            app.client()?.login(&mut session).await?;
            println!("Logged in as {}", session.username);
            if let Some(stream_url) = &session.stream_url {
                println!("Stream: {stream_url}");
            }
            if !session.post_session_established() {
                println!("Submissions unavailable for this session");
            }
        }
        Commands::Tune { station } => {
            let mut session = app.session();
            app.client()?.tune(&mut session, &station).await?;
            print_station(&session);
        }
        Commands::TuneUser { user, feature } => {
            let mut session = app.session();
            app.client()?
                .tune_user(&mut session, &user, &feature)
                .await?;
            print_station(&session);
        }
        Commands::Tracks { station } => {
            let client = app.client()?;
            let mut session = app.session();
            client.tune(&mut session, &station).await?;
            let tracks = client.get_tracks(&mut session).await?;
            if tracks.is_empty() {
                bail!("Station returned no tracks.");
            }
            for track in tracks {
                println!(
                    "{}\t{} - {}\t{}s\t{}",
                    track.id,
                    track.artist,
                    track.name,
                    track.duration / 1000,
                    track.location
                );
            }
        }
        Commands::Friends { username } => {
            for friend in app.client()?.get_friends(&username).await? {
                println!("{}\t{}", friend.username, friend.url.unwrap_or_default());
            }
        }
        Commands::Neighbours { username } => {
            for neighbour in app.client()?.get_neighbours(&username).await? {
                println!("{}\t{}", neighbour.username, neighbour.url.unwrap_or_default());
            }
        }
        Commands::Love(args) => {
            let session = app.session();
            if !app.client()?.love_track(&session, &args.artist, &args.track).await {
                bail!("Failed loving {} - {}", args.artist, args.track);
            }
            println!("Loved {} - {}", args.artist, args.track);
        }
        Commands::Ban(args) => {
            let session = app.session();
            if !app.client()?.ban_track(&session, &args.artist, &args.track).await {
                bail!("Failed banning {} - {}", args.artist, args.track);
            }
            println!("Banned {} - {}", args.artist, args.track);
        }
        Commands::NowPlaying(args) => {
            let mut session = app.session();
            let event = NowPlayingEvent {
                track_name: args.track,
                artist: args.artist,
                album: args.album,
                track_number: args.number,
                duration: args.duration,
            };
            match app.client()?.now_playing(&mut session, &event).await? {
                Delivery::Sent => println!("Now playing {} - {}", event.artist, event.track_name),
                Delivery::Skipped => println!("Now playing skipped: no submission session"),
            }
        }
        Commands::Submit(args) => {
            let event = ScrobbleEvent {
                track_name: args.track.track,
                artist: args.track.artist,
                album: args.track.album,
                track_number: args.track.number,
                duration: args.track.duration.context("--duration is required to submit")?,
                start_timestamp: args
                    .started
                    .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                source: args.source,
            };
            drain(app, Some(event)).await?;
        }
        Commands::Flush => drain(app, None).await?,
        Commands::InitConfig => {
            save_config(&app.config, &app.config_path)?;
            println!("Wrote {}", app.config_path.display());
        }
    }
    Ok(())
}

fn handle_account(app: &mut App, command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Set { username, password } => {
            let password = match password {
                Some(value) => value,
                None => prompt_password_confirm()?,
            };
            app.prefs.set_username(&username)?;
            app.prefs.set_password(&password)?;
            println!(
                "Saved account {username} in {}",
                app.config.prefs_path().display()
            );
        }
        AccountCommand::Show => {
            let username = app.prefs.username();
            if username.is_empty() {
                bail!("No account configured.");
            }
            println!("{username}");
            println!(
                "scrobbling: {}",
                if app.prefs.scrobble_enabled() { "on" } else { "off" }
            );
        }
        AccountCommand::Clear => {
            app.prefs.clear_credentials()?;
            println!("Removed stored account");
        }
    }
    Ok(())
}

fn print_station(session: &Session) {
    println!(
        "Tuned to {}",
        session.station_name.as_deref().unwrap_or("unnamed station")
    );
    if let Some(url) = &session.user_url {
        println!("  {url}");
    }
}

/// Runs the scrobbler loop just long enough to push the cache out.
async fn drain(app: App, event: Option<ScrobbleEvent>) -> Result<()> {
    let client = Arc::new(app.client()?);
    let max_cached = app.config.max_cached;
    let mut scrobbler = Scrobbler::new(
        client,
        app.prefs,
        max_cached,
        Arc::new(NetworkStatus::online()),
    );
    match event {
        Some(event) => scrobbler.handle_command(Command::Enqueue(event)),
        None => scrobbler.handle_command(Command::Flush),
    };
    scrobbler.settle().await;
    let left = scrobbler.cache().len();
    scrobbler.shutdown();
    if left > 0 {
        println!("Finished with {left} submissions still cached.");
    } else {
        println!("All submissions sent.");
    }
    Ok(())
}

fn prompt_password_confirm() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match.");
    }
    Ok(password)
}
