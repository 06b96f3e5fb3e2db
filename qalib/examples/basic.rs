//! Basic example of the Qalib DI container.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use qalib::prelude::*;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

#[derive(Component)]
#[component(expose = "Arc<dyn Logger>")]
struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

struct Config {
    database_url: String,
    debug: bool,
}

#[derive(Component)]
struct Database {
    #[component(shared)]
    config: Arc<Config>,
    logger: Arc<dyn Logger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.config.database_url)
    }
}

trait UserRepository: Send + Sync {
    fn find_user(&self, id: u64) -> String;
}

#[derive(Component)]
#[component(expose = "Arc<dyn UserRepository>", disposable)]
struct SqlUserRepository {
    #[component(shared)]
    db: Arc<Database>,
    #[component(default)]
    queries: AtomicU64,
}

impl UserRepository for SqlUserRepository {
    fn find_user(&self, id: u64) -> String {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.db.query(&format!("SELECT * FROM users WHERE id = {id}"))
    }
}

impl Disposable for SqlUserRepository {
    fn dispose(&self) {
        println!("🧹 Repository disposed after {} queries", self.queries.load(Ordering::Relaxed));
    }
}

// Decorates every UserRepository with timing output.
#[derive(Component)]
#[component(expose = "Arc<dyn UserRepository>")]
struct TimedRepository {
    inner: Arc<dyn UserRepository>,
    logger: Arc<dyn Logger>,
}

impl UserRepository for TimedRepository {
    fn find_user(&self, id: u64) -> String {
        let started = std::time::Instant::now();
        let user = self.inner.find_user(id);
        self.logger.log(&format!("find_user({id}) took {:?}", started.elapsed()));
        user
    }
}

#[derive(Component)]
struct UserService {
    repo: Arc<dyn UserRepository>,
    logger: Arc<dyn Logger>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        self.logger.log(&format!("Getting user {id}"));
        self.repo.find_user(id)
    }
}

#[derive(Default)]
struct AppRoot;

impl CompositionRoot for AppRoot {
    fn compose(&self, registry: &dyn ServiceRegistry) -> Result<()> {
        // Config — a ready-made value
        registry.register(ServiceRegistration::instance(Config {
            database_url: "postgres://localhost/myapp".to_string(),
            debug: true,
        }))?;
        // Logger and Database — one per container
        registry.register(
            ServiceRegistration::for_type::<Arc<dyn Logger>, ConsoleLogger>().with_lifetime(PerContainerLifetime::new()),
        )?;
        registry.register(
            ServiceRegistration::for_type::<Database, Database>().with_lifetime(PerContainerLifetime::new()),
        )?;
        // UserRepository — one per scope (e.g. per HTTP request), decorated
        registry.register(
            ServiceRegistration::for_type::<Arc<dyn UserRepository>, SqlUserRepository>()
                .with_lifetime(PerScopeLifetime::new()),
        )?;
        registry.decorate(DecoratorRegistration::for_type::<Arc<dyn UserRepository>, TimedRepository>())?;
        // UserService — a new one per request
        registry.register(ServiceRegistration::for_type::<UserService, UserService>())?;
        Ok(())
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt().with_env_filter("qalib_container=debug").init();

    // Build the container
    let container = ServiceContainer::builder()
        .validate_on_build(true)
        .with_root::<AppRoot>()
        .build()?;

    println!("✅ Container built successfully!");
    println!("{container:?}");

    // === Resolve from the root container ===
    let config = container.resolve_shared::<Config>()?;
    println!("📋 Config: database_url={}, debug={}", config.database_url, config.debug);

    // === Create a scope (e.g., for an HTTP request) ===
    {
        let _scope = container.begin_scope();

        let service = container.resolve_shared::<UserService>()?;
        println!("👤 {}", service.get_user(42));

        // Resolve again in the same scope — the repository is reused
        let service2 = container.resolve_shared::<UserService>()?;
        println!("👤 {}", service2.get_user(7));
    }
    // scope dropped — scoped instances disposed

    // Outside a scope the repository cannot be created
    if let Err(e) = container.resolve_shared::<UserService>() {
        println!("⚠️  {e}");
    }

    println!("\n🎉 Everything works!");
    Ok(())
}
