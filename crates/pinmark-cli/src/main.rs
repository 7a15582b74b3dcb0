use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pinmark_core::bookmarks::{page_description, page_keywords};
use pinmark_core::{
    ago::ago, match_tags, Bookmarks, ConfigSync, ContextId, LocalBus, Options,
    PinboardClient, PostForm, SqliteKvStore, TagFrequencyCache,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

mod config;
mod watchd_link;

#[derive(Parser)]
#[command(name = "pinmark", version, about = "Save and tag Pinboard bookmarks")]
struct Cli {
    /// Database path (overrides settings)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Pinboard API root (overrides settings)
    #[arg(long, global = true, env = "PINMARK_API_URL")]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify and store an API token (user:SECRET)
    Login { token: String },
    /// Forget the token and the cached tags
    Logout,
    /// Print the logged in user
    Whoami,
    /// Look up the bookmark and tag suggestions for an url
    Show {
        url: String,
        /// The page's `keywords` meta value, offered as tags
        #[arg(long)]
        keywords: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Save a bookmark
    Save {
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Space separated tags
        #[arg(long, default_value = "")]
        tags: String,
        /// Private bookmark (defaults to the `unshared` option)
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        unshared: Option<bool>,
        /// Mark as to read (defaults to the `toread` option)
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        toread: Option<bool>,
        /// Keep an existing bookmark for the url
        #[arg(long)]
        no_overwrite: bool,
        /// Tags the bookmark had before, for the local tag counts
        #[arg(long, default_value = "")]
        previous_tags: String,
        /// The page's `keywords` meta value; toggled into the tags
        #[arg(long)]
        keywords: Option<String>,
    },
    /// Delete a bookmark
    Delete {
        url: String,
        #[arg(long, default_value = "")]
        previous_tags: String,
    },
    /// List all tags with their counts
    Tags {
        #[arg(long)]
        json: bool,
    },
    /// Complete the last word of a tags input
    Complete {
        input: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show or change options
    Options {
        #[command(subcommand)]
        action: Option<OptionsCmd>,
        #[arg(long)]
        json: bool,
    },
    /// Print resolved configuration and paths
    Config {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum OptionsCmd {
    /// Set options, e.g. `ping=true dark=auto`
    Set { pairs: Vec<String> },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PINMARK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Database and API locations after flags, environment and settings are applied.
struct Paths {
    db_path: PathBuf,
    api_url: String,
}

impl Paths {
    fn resolve(cli: &Cli, settings: &config::Settings) -> Self {
        let db_path = cli
            .db
            .clone()
            .or_else(|| settings.storage.db_path.clone())
            .unwrap_or_else(config::default_db_path);
        let api_url = cli
            .api_url
            .clone()
            .or_else(|| settings.api.base_url.clone())
            .unwrap_or_else(|| pinmark_core::remote::DEFAULT_API_URL.to_string());
        Self { db_path, api_url }
    }
}

struct App {
    kv: Arc<SqliteKvStore>,
    bookmarks: Bookmarks,
    settings: config::Settings,
    paths: Paths,
}

impl App {
    fn open(paths: Paths, settings: config::Settings) -> Result<Self> {
        let kv = Arc::new(
            SqliteKvStore::open(&paths.db_path)
                .with_context(|| format!("opening {}", paths.db_path.display()))?,
        );
        let remote = Arc::new(PinboardClient::with_base_url(&paths.api_url, kv.clone())?);
        let cache = Arc::new(TagFrequencyCache::with_ttl(
            kv.clone(),
            remote.clone(),
            settings.ttl(),
        ));
        let bookmarks = Bookmarks::new(kv.clone(), remote, cache);
        Ok(Self {
            kv,
            bookmarks,
            settings,
            paths,
        })
    }

    async fn options(&self) -> Result<Options> {
        Ok(Options::load(self.kv.as_ref()).await?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = config::load_settings();
    let paths = Paths::resolve(&cli, &settings);

    // config works without opening the database
    if let Commands::Config { json } = cli.command {
        return print_config(&paths, &settings, json);
    }
    let app = App::open(paths, settings)?;
    run(&app, cli.command).await
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Login { token } => {
            let user = app.bookmarks.login(&token).await?;
            println!("logged in as {user}");
        }
        Commands::Logout => {
            app.bookmarks.logout().await?;
            println!("logged out");
        }
        Commands::Whoami => match app.bookmarks.user_name().await? {
            Some(user) => println!("{user}"),
            None => bail!("not logged in"),
        },
        Commands::Show {
            url,
            keywords,
            json,
        } => {
            let options = app.options().await?;
            let mut form = app.bookmarks.lookup(&url, &options).await?;
            form.keywords = page_keywords(keywords.as_deref());
            if form.update {
                watchd_link::notify(json!({"op": "saved", "url": form.url})).await;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&form)?);
            } else {
                print_form(&form, &options);
            }
        }
        Commands::Save {
            url,
            title,
            description,
            tags,
            unshared,
            toread,
            no_overwrite,
            previous_tags,
            keywords,
        } => {
            let options = app.options().await?;
            let mut form = PostForm {
                url,
                title,
                description: page_description(description.as_deref(), &options),
                tags,
                unshared: unshared.unwrap_or(options.unshared),
                toread: toread.unwrap_or(options.toread),
                no_overwrite,
                keywords: page_keywords(keywords.as_deref()),
                ..PostForm::default()
            };
            form.toggle_keywords();
            let post = app.bookmarks.save(&form, &previous_tags).await?;
            watchd_link::notify(json!({"op": "saved", "url": post.url})).await;
            println!("saved {}", post.url);
        }
        Commands::Delete { url, previous_tags } => {
            let result = app.bookmarks.delete(&url, &previous_tags).await;
            watchd_link::notify(json!({"op": "deleted", "url": url})).await;
            result?;
            println!("deleted {url}");
        }
        Commands::Tags { json } => {
            let options = app.options().await?;
            let table = app.bookmarks.cache().read().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table.tags)?);
            } else {
                let mut rows: Vec<(&String, &u64)> = table.tags.iter().collect();
                if options.sort_by_frequency() {
                    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
                }
                for (tag, n) in rows {
                    println!("{tag}\t{n}");
                }
            }
            app.bookmarks.cache().settle().await;
        }
        Commands::Complete { input, limit, json } => {
            let options = app.options().await?;
            let table = app.bookmarks.cache().read().await?;
            let limit = limit.unwrap_or_else(|| app.settings.complete_limit());
            let found = match_tags(&input, &table, &[], options.sort_by_frequency(), limit);
            if json {
                println!("{}", serde_json::to_string(&found)?);
            } else {
                for tag in found {
                    println!("{tag}");
                }
            }
            app.bookmarks.cache().settle().await;
        }
        Commands::Options { action, json } => match action {
            None => {
                let options = app.options().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&options)?);
                } else {
                    print_options(&options)?;
                }
            }
            Some(OptionsCmd::Set { pairs }) => {
                if pairs.is_empty() {
                    bail!("nothing to set; use key=value");
                }
                let sync = ConfigSync::new(ContextId::new(), LocalBus::default(), app.kv.clone())
                    .await?;
                let mut options = sync.current();
                for pair in &pairs {
                    let Some((key, value)) = pair.split_once('=') else {
                        bail!("expected key=value, got {pair:?}");
                    };
                    options.set_field(key.trim(), value)?;
                }
                if sync.publish(options).await? {
                    watchd_link::notify(json!({"op": "options", "options": options})).await;
                    println!("options updated");
                } else {
                    println!("options unchanged");
                }
            }
        },
        Commands::Config { json } => print_config(&app.paths, &app.settings, json)?,
    }
    Ok(())
}

fn print_form(form: &PostForm, options: &Options) {
    println!("url\t{}", form.url);
    if form.update {
        println!("title\t{}", form.title);
        if let Some(d) = &form.description {
            println!("description\t{d}");
        }
        println!("tags\t{}", form.tags.trim());
        println!(
            "flags\t{}{}",
            if form.unshared { "private" } else { "public" },
            if form.toread { ", to read" } else { "" }
        );
        println!("saved\t{}", ago(form.time, OffsetDateTime::now_utc()));
    } else {
        println!("saved\tno");
    }
    if !form.suggested.is_empty() {
        println!("suggested\t{}", form.suggested.join(" "));
    }
    if options.popular && !form.popular.is_empty() {
        println!("popular\t{}", form.popular.join(" "));
    }
    if !form.keywords.is_empty() {
        println!("keywords\t{}", form.keywords.join(" "));
    }
}

fn print_options(options: &Options) -> Result<()> {
    let value = serde_json::to_value(options)?;
    for key in pinmark_core::options::OPTION_KEYS {
        let shown = match &value[key] {
            serde_json::Value::Null => "auto".to_string(),
            v => v.to_string(),
        };
        println!("{key}\t{shown}");
    }
    Ok(())
}

fn print_config(paths: &Paths, settings: &config::Settings, json: bool) -> Result<()> {
    let (db_path, api_url) = (&paths.db_path, &paths.api_url);
    if json {
        let v = json!({
            "config_dir": config::config_dir(),
            "settings_path": config::settings_path(),
            "db_path": db_path,
            "api_url": api_url,
            "watchd_info": config::watchd_info_path(),
            "cache": {"ttl_secs": settings.ttl().as_secs()},
            "complete": {"limit": settings.complete_limit()},
            "watchd": {"port": settings.watchd.port.unwrap_or(0)},
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
    } else {
        println!("config_dir\t{}", config::config_dir().display());
        println!("settings\t{}", config::settings_path().display());
        println!("db\t{}", db_path.display());
        println!("api\t{api_url}");
        println!("ttl_secs\t{}", settings.ttl().as_secs());
        println!("complete_limit\t{}", settings.complete_limit());
    }
    Ok(())
}
