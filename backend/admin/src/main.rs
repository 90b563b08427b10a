use std::{path::PathBuf, sync::Arc};

use admin::{
    client::AdminClient,
    commands::{self, build_patch},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use contact::{ContactForm, ListQuery, Priority, SortField, SortOrder, SubmissionStatus};
use folio::FileStorage;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "FOLIO_URL", default_value = "http://localhost:1111")]
    url: String,

    /// Where the session cookie and drafts are kept
    #[arg(long, default_value = ".folio-admin.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        api_key: String,
    },
    Logout,
    List(ListArgs),
    Show {
        id: String,
    },
    Update {
        id: String,

        #[arg(long)]
        status: Option<SubmissionStatus>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        priority: Option<u8>,

        #[arg(long, conflicts_with = "priority")]
        clear_priority: bool,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    Delete {
        id: String,
    },
    /// Write every submission to a JSON file
    Export {
        file: PathBuf,
    },
    Stats,
    /// Email queue counts
    Queue {
        #[arg(long)]
        retry: bool,

        #[arg(long)]
        clear_sent: bool,
    },
    /// Submit the public contact form
    Contact {
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, default_value = "")]
        email: String,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        message: String,

        /// Start from the saved draft
        #[arg(long)]
        resume: bool,
    },
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long)]
    status: Option<SubmissionStatus>,

    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    priority: Option<u8>,

    #[arg(long, value_enum, default_value_t = Sort::CreatedAt)]
    sort: Sort,

    #[arg(long, value_enum, default_value_t = Order::Desc)]
    order: Order,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 20)]
    page_size: u32,

    #[arg(long)]
    search: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Sort {
    CreatedAt,
    UpdatedAt,
    Name,
    Email,
    Subject,
    Status,
    Priority,
}

impl From<Sort> for SortField {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::CreatedAt => SortField::CreatedAt,
            Sort::UpdatedAt => SortField::UpdatedAt,
            Sort::Name => SortField::Name,
            Sort::Email => SortField::Email,
            Sort::Subject => SortField::Subject,
            Sort::Status => SortField::Status,
            Sort::Priority => SortField::Priority,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortOrder::Asc,
            Order::Desc => SortOrder::Desc,
        }
    }
}

impl From<ListArgs> for ListQuery {
    fn from(args: ListArgs) -> Self {
        ListQuery {
            page: args.page,
            page_size: args.page_size,
            sort_by: args.sort.into(),
            order: args.order.into(),
            status: args.status,
            priority: args.priority.and_then(Priority::new),
            search: args.search,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = Arc::new(FileStorage::open(&cli.state)?);
    let client = AdminClient::new(&cli.url, storage.clone());

    match cli.command {
        Command::Login { api_key } => {
            client.login(&api_key).await?;
            println!("Signed in, session saved to {}", storage.path().display());
        }
        Command::Logout => {
            client.logout().await?;
            println!("Signed out");
        }
        Command::List(args) => commands::list(&client, args.into()).await?,
        Command::Show { id } => commands::show(&client, &id).await?,
        Command::Update {
            id,
            status,
            priority,
            clear_priority,
            tags,
            clear_tags,
        } => {
            let patch = build_patch(status, priority, clear_priority, tags, clear_tags)?;
            commands::update(&client, &id, patch).await?;
        }
        Command::Delete { id } => println!("{}", client.delete(&id).await?.message),
        Command::Export { file } => commands::export(&client, &file).await?,
        Command::Stats => commands::stats(&client).await?,
        Command::Queue { retry, clear_sent } => commands::queue(&client, retry, clear_sent).await?,
        Command::Contact {
            name,
            email,
            subject,
            message,
            resume,
        } => {
            let fields = ContactForm {
                name,
                email,
                subject,
                message,
            };
            commands::submit_contact(&client, storage, fields, resume).await?;
        }
    }

    Ok(())
}
