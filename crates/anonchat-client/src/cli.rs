//! Command-line surface.

use clap::{Parser, Subcommand, ValueEnum};

use anonchat_sync::{FeedQuery, RefreshInterval, SortOrder, TimeWindow};

#[derive(Parser, Debug)]
#[command(name = "anonchat", version, about = "Anonymous chat board client")]
pub struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show one page of the board
    List(FeedArgs),

    /// Show the board and redraw it on every change
    Watch(FeedArgs),

    /// Show a message with its replies
    Thread {
        /// Message id
        id: String,
    },

    /// Post a new message
    Post {
        /// Message text
        content: String,

        /// Comma-separated tags, e.g. "news,misc"
        #[arg(short, long, default_value = "")]
        tags: String,
    },

    /// Reply to a top-level message
    Reply {
        /// Id of the message to reply to
        parent: String,

        /// Reply text
        content: String,
    },

    /// Like a message, or remove your like
    Like {
        /// Message id
        id: String,
    },

    /// Show the most used tags
    Tags,

    /// Show board activity statistics
    Monitor {
        /// Trailing window for rate metrics
        #[arg(short, long, value_enum, default_value = "24h")]
        window: WindowArg,

        /// Polling period while following
        #[arg(short, long, value_enum, default_value = "30s")]
        interval: IntervalArg,

        /// Keep printing snapshots as they change
        #[arg(short, long)]
        follow: bool,
    },

    /// Print this client's anonymous identity
    Whoami,
}

#[derive(clap::Args, Debug, Clone)]
pub struct FeedArgs {
    /// Case-insensitive text search
    #[arg(short, long, default_value = "")]
    pub search: String,

    /// Only messages carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Sort order
    #[arg(long, value_enum, default_value = "newest")]
    pub sort: SortArg,

    /// Page number, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,
}

impl FeedArgs {
    pub fn query(&self) -> FeedQuery {
        FeedQuery {
            search: self.search.clone(),
            tag: self.tag.clone(),
            sort: self.sort.into(),
            page: self.page,
            ..Default::default()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortArg {
    Newest,
    Oldest,
    Popular,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Newest => SortOrder::Newest,
            SortArg::Oldest => SortOrder::Oldest,
            SortArg::Popular => SortOrder::Popular,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowArg {
    #[value(name = "1h")]
    Hour,
    #[value(name = "24h")]
    Day,
    #[value(name = "7d")]
    Week,
    #[value(name = "30d")]
    Month,
}

impl From<WindowArg> for TimeWindow {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Hour => TimeWindow::Hour,
            WindowArg::Day => TimeWindow::Day,
            WindowArg::Week => TimeWindow::Week,
            WindowArg::Month => TimeWindow::Month,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalArg {
    Manual,
    #[value(name = "30s")]
    Secs30,
    #[value(name = "60s")]
    Secs60,
    #[value(name = "300s")]
    Secs300,
}

impl From<IntervalArg> for RefreshInterval {
    fn from(arg: IntervalArg) -> Self {
        match arg {
            IntervalArg::Manual => RefreshInterval::Manual,
            IntervalArg::Secs30 => RefreshInterval::Secs30,
            IntervalArg::Secs60 => RefreshInterval::Secs60,
            IntervalArg::Secs300 => RefreshInterval::Secs300,
        }
    }
}
