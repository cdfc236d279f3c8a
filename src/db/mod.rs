use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use rocket::fairing::AdHoc;
use log::{error, info, warn};

pub const USERS: &str = "users";
pub const PROJECTS: &str = "projects";
pub const SERVICES: &str = "services";
pub const PAYMENTS: &str = "payments";
pub const MESSAGES: &str = "messages";
pub const REVIEWS: &str = "reviews";
pub const PASSWORD_RESETS: &str = "password_resets";
pub const RATE_LIMITS: &str = "rate_limits";

pub fn init() -> AdHoc {
    AdHoc::try_on_ignite("MongoDB", |rocket| async {
        match connect().await {
            Ok(database) => {
                info!("✓ MongoDB connected successfully");
                if let Err(e) = ensure_indexes(&database).await {
                    warn!("Index creation failed: {}", e);
                }
                Ok(rocket.manage(database))
            }
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                Err(rocket)
            }
        }
    })
}

async fn connect() -> Result<Database, mongodb::error::Error> {
    let uri = crate::config::Config::mongodb_uri();
    let client = Client::with_uri_str(&uri).await?;

    // Test connection
    client
        .database("admin")
        .run_command(doc! {"ping": 1}, None)
        .await?;

    Ok(client.database(&crate::config::Config::database_name()))
}

async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let unique = || IndexOptions::builder().unique(true).build();

    db.collection::<mongodb::bson::Document>(USERS)
        .create_index(
            IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>(PAYMENTS)
        .create_index(
            IndexModel::builder().keys(doc! { "order_id": 1 }).options(unique()).build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>(REVIEWS)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "service_id": 1, "reviewer_id": 1 })
                .options(unique())
                .build(),
            None,
        )
        .await?;

    db.collection::<mongodb::bson::Document>(MESSAGES)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "conversation_id": 1, "created_at": -1 })
                .build(),
            None,
        )
        .await?;

    // Expired rate-limit windows and reset codes are dropped by MongoDB itself.
    let ttl = || {
        IndexOptions::builder()
            .expire_after(std::time::Duration::from_secs(0))
            .build()
    };
    for collection in [RATE_LIMITS, PASSWORD_RESETS] {
        db.collection::<mongodb::bson::Document>(collection)
            .create_index(
                IndexModel::builder().keys(doc! { "expires_at": 1 }).options(ttl()).build(),
                None,
            )
            .await?;
    }

    Ok(())
}

/// Liveness check used by the health route.
pub async fn ping(db: &Database) -> bool {
    db.run_command(doc! { "ping": 1 }, None).await.is_ok()
}

/// True when a write was rejected by a unique index.
pub fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

pub type DbConn = Database;
