#![forbid(unsafe_code)]

//! Terminal shell around the gallery state core. It plays the role of the
//! browser: the location is a URL given on the command line, session and
//! local storage are JSON files under the state directory, and the viewport
//! is a plain offset.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use newtube_gallery::{
    api::VideosClient,
    config::{ConfigOverrides, DEFAULT_ENV_PATH, GalleryConfig, resolve_gallery_config},
    events::{AppEvent, EventBus},
    filters::{
        ChannelTagMode, NotInterestedFilter, TagMode, WatchStatus,
        channel::{ChannelContext, ChannelFilters},
        video::VideoFilters,
    },
    logging::{DEFAULT_LOG_FILTER, init_tracing},
    navigation::MemoryNavigator,
    pagination::{InfiniteVideos, PaginationOptions},
    return_url::sanitize_return_url,
    scroll::{MemoryViewport, ScrollPositionStore, SystemClock, VIDEOS_CONTEXT, Viewport},
    session::{AppStore, ScrollMode},
    storage::{FileStorage, NamespacedStorage, SESSION_ROOT_KEY, StorageBackend},
    trigger::InfiniteScroll,
};

/// Nominal height of one rendered row, used to turn "rows seen" into a
/// scroll offset.
const ROW_HEIGHT_PX: u64 = 96;

#[derive(Debug, Parser)]
#[command(name = "newtube-gallery", version, about = "Browse the NewTube video gallery")]
struct Cli {
    /// Backend base URL (overrides NEWTUBE_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Directory holding session/local storage files.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true, default_value = DEFAULT_ENV_PATH)]
    env_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a video list URL, restoring the previous scroll depth when one is saved.
    Browse {
        /// List location, e.g. "/videos?filter=watched&tags=tech".
        url: String,
        /// Total pages to have loaded before printing.
        #[arg(long, default_value_t = 1)]
        pages: u32,
        #[arg(long)]
        page_size: Option<u32>,
        /// Offset to save on exit; defaults to the end of the printed rows.
        #[arg(long)]
        scroll_y: Option<u64>,
    },
    /// Apply one filter change to a list URL and print the resulting URL.
    Filter {
        url: String,
        #[command(subcommand)]
        action: FilterAction,
    },
    /// Print the redirect a login with this returnUrl would use.
    ReturnUrl {
        candidate: String,
        #[arg(long, default_value = "/videos")]
        fallback: String,
    },
    /// Show or set the scroll-mode preference.
    ScrollMode { mode: Option<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelList {
    Subscribed,
    Available,
}

impl From<ChannelList> for ChannelContext {
    fn from(value: ChannelList) -> Self {
        match value {
            ChannelList::Subscribed => Self::Subscribed,
            ChannelList::Available => Self::Available,
        }
    }
}

#[derive(Debug, Subcommand)]
enum FilterAction {
    Status { value: String },
    AddTag { tag: String },
    RemoveTag { tag: String },
    TagMode { value: String },
    Search { query: String },
    NotInterested { value: String },
    Clear,
    ChannelSearch { list: ChannelList, query: String },
    ChannelPage { list: ChannelList, page: u32 },
    ChannelAddTag { list: ChannelList, tag: String },
    ChannelTagMode { list: ChannelList, value: String },
}

fn parse_token<T>(value: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> Result<T> {
    parse(value).ok_or_else(|| anyhow!("unknown {what}: {value:?}"))
}

fn apply_filter_action(url: &str, action: FilterAction) -> Result<String> {
    let nav = MemoryNavigator::new(url);
    let videos = VideoFilters::new(&nav);
    match action {
        FilterAction::Status { value } => {
            videos.update_filter(parse_token(&value, WatchStatus::parse, "watch status")?)
        }
        FilterAction::AddTag { tag } => {
            videos.add_tag(&tag);
        }
        FilterAction::RemoveTag { tag } => {
            videos.remove_tag(&tag);
        }
        FilterAction::TagMode { value } => {
            videos.update_tag_mode(parse_token(&value, TagMode::parse, "tag mode")?)
        }
        FilterAction::Search { query } => videos.update_search_query(&query),
        FilterAction::NotInterested { value } => videos.update_not_interested_filter(parse_token(
            &value,
            NotInterestedFilter::parse,
            "not-interested filter",
        )?),
        FilterAction::Clear => videos.clear_filters(),
        FilterAction::ChannelSearch { list, query } => {
            ChannelFilters::new(&nav, list.into()).update_search(&query)
        }
        FilterAction::ChannelPage { list, page } => {
            ChannelFilters::new(&nav, list.into()).update_page(page)
        }
        FilterAction::ChannelAddTag { list, tag } => {
            ChannelFilters::new(&nav, list.into()).add_tag(&tag);
        }
        FilterAction::ChannelTagMode { list, value } => ChannelFilters::new(&nav, list.into())
            .update_tag_mode(parse_token(&value, ChannelTagMode::parse, "channel tag mode")?),
    }
    Ok(nav.current_url())
}

/// Everything the application shell owns, built once at startup.
struct Shell {
    config: GalleryConfig,
    storage: Arc<dyn StorageBackend>,
    events: EventBus,
    app: Arc<AppStore>,
}

impl Shell {
    fn bootstrap(cli: &Cli) -> Result<Self> {
        let config = resolve_gallery_config(ConfigOverrides {
            api_url: cli.api_url.clone(),
            page_size: None,
            state_dir: cli.state_dir.clone(),
            env_path: Some(cli.env_file.clone()),
        })?;
        let storage: Arc<dyn StorageBackend> = Arc::new(FileStorage::new(&config.state_dir));
        let events = EventBus::new();
        let app = Arc::new(AppStore::new(storage.clone(), events.clone()));
        Ok(Self {
            config,
            storage,
            events,
            app,
        })
    }

    fn positions(&self) -> ScrollPositionStore {
        let session = Arc::new(NamespacedStorage::new(self.storage.clone(), SESSION_ROOT_KEY));
        ScrollPositionStore::new(session, Arc::new(SystemClock))
    }

    fn watch_events(&self) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                match event {
                    AppEvent::AuthRequired => {
                        eprintln!("Sign-in required: the backend rejected the stored session.")
                    }
                    AppEvent::YoutubeAuthRequired { message } => {
                        eprintln!("YouTube authorization required: {message}")
                    }
                    AppEvent::ScrollRestored { context, scroll_y } => {
                        println!("Restored {context} list to offset {scroll_y}px.")
                    }
                }
            }
        })
    }

    async fn browse(
        &self,
        url: &str,
        pages: u32,
        page_size: Option<u32>,
        scroll_y: Option<u64>,
    ) -> Result<()> {
        let nav = MemoryNavigator::new(url);
        let filters = VideoFilters::new(&nav).state();
        let positions = self.positions();
        let options = PaginationOptions {
            context: VIDEOS_CONTEXT.to_string(),
            page_size: page_size.unwrap_or(self.config.page_size),
            retry_count: self.config.fetch_retries,
            ..PaginationOptions::default()
        };
        let client = VideosClient::new(self.config.api_url.clone(), self.app.clone());
        let engine = InfiniteVideos::new(client, positions.clone(), self.events.clone(), options);
        let viewport = Arc::new(MemoryViewport::default());

        engine
            .mount(filters.clone(), viewport.as_ref())
            .await
            .with_context(|| format!("loading {url}"))?;

        let scroll = InfiniteScroll::new(
            engine.clone(),
            positions,
            viewport.clone(),
            self.app.scroll_mode(),
        );
        scroll.sync_filters(&filters);
        while engine.loaded_pages() < pages && engine.has_next_page() {
            let requested = match scroll.mode() {
                ScrollMode::Auto => scroll.on_sentinel_visible().await?,
                ScrollMode::Manual => scroll.load_more().await?,
            };
            if !requested {
                break;
            }
        }

        let videos = engine.videos();
        for video in &videos {
            let watched = if video.is_watched { "x" } else { " " };
            let channel = video.channel_title.as_deref().unwrap_or("-");
            println!("[{watched}] {}  {}  ({channel})", video.uuid, video.title);
        }
        println!(
            "{} of {} videos, {} page(s) loaded{}",
            videos.len(),
            engine.total_count().unwrap_or_default(),
            engine.loaded_pages(),
            if engine.has_next_page() { ", more available" } else { "" }
        );

        let rows = u64::try_from(videos.len()).unwrap_or(u64::MAX);
        let offset = scroll_y.unwrap_or_else(|| {
            viewport
                .scroll_y()
                .max(rows.saturating_mul(ROW_HEIGHT_PX))
        });
        viewport.scroll_to(offset);
        scroll.save_now();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_LOG_FILTER);
    let cli = Cli::parse();

    match cli.command {
        Command::Filter { ref url, action } => {
            println!("{}", apply_filter_action(url, action)?);
        }
        Command::ReturnUrl {
            ref candidate,
            ref fallback,
        } => {
            println!("{}", sanitize_return_url(Some(candidate.as_str()), fallback));
        }
        Command::ScrollMode { ref mode } => {
            let shell = Shell::bootstrap(&cli)?;
            if let Some(raw) = mode {
                let parsed = parse_token(raw, ScrollMode::parse, "scroll mode")?;
                shell.app.set_scroll_mode(parsed);
            }
            println!("{}", shell.app.scroll_mode().as_str());
        }
        Command::Browse {
            ref url,
            pages,
            page_size,
            scroll_y,
        } => {
            let shell = Shell::bootstrap(&cli)?;
            let listener = shell.watch_events();
            let result = shell.browse(url, pages.max(1), page_size, scroll_y).await;
            listener.abort();
            result?;
        }
    }
    Ok(())
}
