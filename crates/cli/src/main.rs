//! Marketstall CLI - Browse the catalog, manage the cart and check out.
//!
//! # Usage
//!
//! ```bash
//! # List products, optionally for one vendor
//! ms-cli products --vendor 3
//!
//! # Work with the anonymous cart persisted in MARKETSTALL_IDENTITY_FILE
//! ms-cli cart add 12 -q 2
//! ms-cli cart update 12 1
//! ms-cli cart show
//!
//! # Sign in, merging the guest cart into the user's cart
//! ms-cli login --user-id 7 --cart-id 5d1f...
//!
//! # Guest checkout
//! ms-cli checkout --name "Ada Buyer" --email ada@example.com --phone 555-0100 \
//!     --line1 "1 Market St" --city Springfield --postal-code 12345 --country US
//!
//! # Look up a guest order
//! ms-cli track 42 --email ada@example.com
//! ```
//!
//! Every command except `products` and `track` opens a cart session. Passing
//! `--as-user` and `--as-user-cart` signs in before the command runs.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use marketstall_core::{Email, OrderId, ProductId, UserId, VendorId};
use marketstall_storefront::StorefrontConfig;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;
use commands::checkout::GuestArgs;

#[derive(Parser)]
#[command(name = "ms-cli")]
#[command(author, version, about = "Marketstall storefront client")]
struct Cli {
    /// Sign in as this user before running the command
    #[arg(long, global = true, requires = "as_user_cart")]
    as_user: Option<UserId>,

    /// Cart token of the `--as-user` user
    #[arg(long, global = true, requires = "as_user")]
    as_user_cart: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List products
    Products {
        /// Only this vendor's products
        #[arg(long)]
        vendor: Option<VendorId>,
    },
    /// Show or change the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Sign in and show the resulting cart
    Login {
        #[arg(long)]
        user_id: UserId,

        /// The user's cart token on the cart-of-record
        #[arg(long)]
        cart_id: String,

        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and continue with an anonymous cart
    Logout,
    /// Place an order for the current cart
    Checkout(GuestArgs),
    /// Look up a guest order
    Track {
        order_id: OrderId,

        /// Email used at checkout
        #[arg(long)]
        email: Email,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show,
    /// Add a product
    Add {
        product_id: ProductId,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove a product
    Remove { product_id: ProductId },
    /// Set a product's quantity (0 removes it)
    Update { product_id: ProductId, quantity: u32 },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketstall_storefront=info,marketstall_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, &config).await {
        tracing::error!(error = %e, "Command failed");
        commands::print_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &StorefrontConfig) -> Result<(), CliError> {
    let user = cli.as_user.zip(cli.as_user_cart);

    match cli.command {
        Commands::Products { vendor } => commands::products::list(config, vendor).await,
        Commands::Track { order_id, email } => {
            commands::checkout::track(config, order_id, &email).await
        }
        command => {
            let session = commands::open_session(config, user).await?;
            let result = match command {
                Commands::Cart { action } => match action {
                    CartAction::Show => {
                        commands::cart::show(&session, config);
                        Ok(())
                    }
                    CartAction::Add {
                        product_id,
                        quantity,
                    } => commands::cart::add(&session, config, product_id, quantity).await,
                    CartAction::Remove { product_id } => {
                        commands::cart::remove(&session, config, product_id).await
                    }
                    CartAction::Update {
                        product_id,
                        quantity,
                    } => commands::cart::update(&session, config, product_id, quantity).await,
                },
                Commands::Login {
                    user_id,
                    cart_id,
                    email,
                } => commands::auth::login(&session, config, user_id, cart_id, email).await,
                Commands::Logout => commands::auth::logout(&session, config).await,
                Commands::Checkout(guest) => {
                    commands::checkout::checkout(&session, guest).await
                }
                Commands::Products { .. } | Commands::Track { .. } => Ok(()),
            };
            session.shutdown().await;
            result
        }
    }
}
