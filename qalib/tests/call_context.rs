#![cfg(feature = "async")]

use std::sync::Arc;

use qalib::prelude::*;
use qalib::scope::with_call_context;

trait UnitOfWork: Send + Sync {}

#[derive(Component)]
#[component(expose = "Arc<dyn UnitOfWork>")]
struct Work;

impl UnitOfWork for Work {}

fn call_context_container() -> Arc<ServiceContainer> {
    let container = ServiceContainer::builder()
        .scope_affinity(ScopeAffinity::CallContext)
        .build()
        .unwrap();
    container.register_scoped::<Arc<dyn UnitOfWork>, Work>().unwrap();
    Arc::new(container)
}

async fn unit_of_work_across_awaits(container: Arc<ServiceContainer>) -> Arc<dyn UnitOfWork> {
    let scope = container.begin_scope();
    let before: Arc<dyn UnitOfWork> = container.resolve().unwrap();
    tokio::task::yield_now().await;
    let after: Arc<dyn UnitOfWork> = container.resolve().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    scope.dispose().unwrap();
    before
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scope_follows_the_call_chain() {
    let container = call_context_container();
    let work = with_call_context(unit_of_work_across_awaits(container.clone())).await;

    let again: Arc<dyn UnitOfWork> = with_call_context(unit_of_work_across_awaits(container)).await;
    assert!(!Arc::ptr_eq(&work, &again));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_call_contexts_do_not_share_scopes() {
    let container = call_context_container();

    let (left, right) = tokio::join!(
        with_call_context(unit_of_work_across_awaits(container.clone())),
        with_call_context(unit_of_work_across_awaits(container.clone())),
    );

    assert!(!Arc::ptr_eq(&left, &right));
    assert!(container.current_scope().is_none());
}

#[tokio::test]
async fn scope_is_visible_inside_its_context_only() {
    let container = call_context_container();

    let inside = container.clone();
    with_call_context(async move {
        let _scope = inside.begin_scope();
        assert!(inside.current_scope().is_some());
    })
    .await;

    assert!(container.current_scope().is_none());
}
