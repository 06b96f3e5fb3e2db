use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use qalib::prelude::*;

trait Transport: Send + Sync {
    fn send(&self, message: &str) -> String;
}

#[derive(Component)]
#[component(expose = "Arc<dyn Transport>")]
struct Smtp {
    #[component(name = "smtp-host")]
    host: String,
}

impl Transport for Smtp {
    fn send(&self, message: &str) -> String {
        format!("{message} via {}", self.host)
    }
}

trait AuditLog: Send + Sync {
    fn record(&self, entry: &str);

    fn entries(&self) -> usize;
}

#[derive(Component)]
#[component(expose = "Arc<dyn AuditLog>")]
struct MemoryAudit {
    #[component(default)]
    entries: AtomicUsize,
}

impl AuditLog for MemoryAudit {
    fn record(&self, _entry: &str) {
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

#[derive(Component)]
struct Mailer {
    transport: Lazy<Arc<dyn Transport>>,
    #[component(property)]
    audit: Option<Arc<dyn AuditLog>>,
    #[component(default)]
    sent: AtomicUsize,
}

impl Mailer {
    fn send(&self, message: &str) -> Result<String> {
        let receipt = self.transport.get()?.send(message);
        if let Some(audit) = &self.audit {
            audit.record(&receipt);
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(receipt)
    }
}

fn mail_container() -> ServiceContainer {
    let container = ServiceContainer::new();
    container
        .register(ServiceRegistration::instance(String::from("mx.local")).named("smtp-host"))
        .unwrap();
    container.register_type::<Arc<dyn Transport>, Smtp>().unwrap();
    container.register_type::<Mailer, Mailer>().unwrap();
    container
}

#[test]
fn named_lazy_and_default_fields() {
    let container = mail_container();
    let mailer = container.resolve_shared::<Mailer>().unwrap();

    assert!(!mailer.transport.is_value_created());
    assert!(mailer.audit.is_none());
    assert_eq!(mailer.send("hi").unwrap(), "hi via mx.local");
    assert!(mailer.transport.is_value_created());
    assert_eq!(mailer.sent.load(Ordering::SeqCst), 1);
}

#[test]
fn optional_property_is_set_when_registered() {
    let container = mail_container();
    container.register_singleton::<Arc<dyn AuditLog>, MemoryAudit>().unwrap();

    let mailer = container.resolve_shared::<Mailer>().unwrap();
    mailer.send("one").unwrap();
    mailer.send("two").unwrap();

    let audit: Arc<dyn AuditLog> = container.resolve().unwrap();
    assert_eq!(audit.entries(), 2);
}

#[derive(Component)]
struct Strict {
    #[component(inject, name = "primary")]
    audit: Option<Arc<dyn AuditLog>>,
}

#[test]
fn injected_property_is_required() {
    let container = ServiceContainer::new();
    container.register_type::<Strict, Strict>().unwrap();

    let err = container.resolve_shared::<Strict>().map(|_| ()).unwrap_err();
    assert!(matches!(err, QalibError::UnresolvedDependency(ref e) if e.member_name == "audit"));

    container
        .register(ServiceRegistration::for_type::<Arc<dyn AuditLog>, MemoryAudit>().named("primary"))
        .unwrap();
    assert!(container.resolve_shared::<Strict>().unwrap().audit.is_some());
}

trait Report: Send + Sync {
    fn title(&self) -> String;
}

struct NumberedReport(u32);

impl Report for NumberedReport {
    fn title(&self) -> String {
        format!("report #{}", self.0)
    }
}

#[derive(Component)]
struct ReportDesk {
    transports: Func<Arc<dyn Transport>>,
    reports: FuncWith<u32, Arc<dyn Report>>,
}

#[test]
fn factory_fields_resolve_on_call() {
    let container = mail_container();
    container
        .register_factory::<Arc<dyn Report>>(FactoryExpression::factory_with(|_, number: u32| {
            Ok(Arc::new(NumberedReport(number)) as Arc<dyn Report>)
        }))
        .unwrap();
    container.register_type::<ReportDesk, ReportDesk>().unwrap();

    let desk = container.resolve_shared::<ReportDesk>().unwrap();
    let a = desk.transports.call().unwrap();
    let b = desk.transports.call().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.send("x"), "x via mx.local");

    assert_eq!(desk.reports.call(3).unwrap().title(), "report #3");
    assert_eq!(desk.reports.call(4).unwrap().title(), "report #4");
}

struct Settings {
    retries: u32,
}

#[derive(Component)]
struct Worker {
    #[component(shared)]
    settings: Arc<Settings>,
}

#[test]
fn shared_fields_hold_the_registered_value() {
    let container = ServiceContainer::new();
    container.register_instance(Settings { retries: 3 }).unwrap();
    container.register_type::<Worker, Worker>().unwrap();

    let settings = container.resolve_shared::<Settings>().unwrap();
    let worker = container.resolve_shared::<Worker>().unwrap();
    assert_eq!(worker.settings.retries, 3);
    assert!(Arc::ptr_eq(&settings, &worker.settings));
}
