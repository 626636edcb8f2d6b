//! Интеграционные тесты жизненного цикла модулей.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::executor::block_on;
use futures::future::try_join_all;

use asg_linker::engine::{Object, SourceModule};
use asg_linker::modules::NamespaceFuture;
use asg_linker::{
    Engine, LinkError, LoaderError, LoaderResult, ModuleFuture, ModuleHandle, ModuleLinker,
    ModuleStatus, Promise, Value,
};

use common::{init_logging, no_dependencies, settled_resolver};

fn link_and_wait(
    linker: &ModuleLinker,
    record: &ModuleHandle,
    resolver: impl FnMut(&str) -> LoaderResult<ModuleFuture>,
) -> Vec<ModuleHandle> {
    let futures = linker.link(record, resolver).unwrap();
    block_on(try_join_all(futures)).unwrap()
}

#[test]
fn test_module_without_dependencies_end_to_end() {
    init_logging();
    let linker = ModuleLinker::new();
    let record = linker
        .compile("(export answer) (let answer (* 6 7))", "mem:/m.asg")
        .unwrap();
    assert_eq!(record.status(), ModuleStatus::Compiled);

    let futures = linker.link(&record, no_dependencies).unwrap();
    assert!(futures.is_empty());
    assert_eq!(record.status(), ModuleStatus::Linking);

    linker.instantiate(&record).unwrap();
    assert_eq!(record.status(), ModuleStatus::Instantiated);

    linker.evaluate(&record).unwrap();
    assert_eq!(record.status(), ModuleStatus::Evaluated);

    let namespace = linker.namespace(&record).unwrap();
    assert_eq!(namespace.names(), vec!["answer".to_string()]);
    assert_eq!(namespace.get("answer"), Some(Value::Int(42)));
}

#[test]
fn test_status_only_moves_forward() {
    let linker = ModuleLinker::new();
    let lib = linker.compile("(export x) (let x 1)", "mem:/lib.asg").unwrap();
    let main = linker
        .compile(r#"(import "./lib" x) (export y) (let y (+ x 1))"#, "mem:/main.asg")
        .unwrap();

    let mut seen = vec![main.status()];
    link_and_wait(&linker, &main, settled_resolver(vec![("./lib", lib.clone())]));
    seen.push(main.status());
    linker.instantiate(&main).unwrap();
    seen.push(main.status());
    linker.evaluate(&main).unwrap();
    seen.push(main.status());

    // Повторные операции не откатывают состояние.
    assert!(linker.link(&main, no_dependencies).is_err());
    assert!(linker.instantiate(&main).is_err());
    linker.evaluate(&main).unwrap();
    seen.push(main.status());

    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(
        seen,
        vec![
            ModuleStatus::Compiled,
            ModuleStatus::Linking,
            ModuleStatus::Instantiated,
            ModuleStatus::Evaluated,
            ModuleStatus::Evaluated,
        ]
    );
    assert_eq!(lib.status(), ModuleStatus::Evaluated);
}

#[test]
fn test_link_futures_follow_declaration_order() {
    let linker = ModuleLinker::new();
    let record = linker
        .compile(r#"(import "a") (import "b")"#, "mem:/m.asg")
        .unwrap();

    let issued: Rc<RefCell<Vec<(String, ModuleFuture)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = issued.clone();
    let futures = linker
        .link(&record, move |specifier: &str| -> LoaderResult<ModuleFuture> {
            let future = Promise::pending();
            log.borrow_mut().push((specifier.to_string(), future.clone()));
            Ok(future)
        })
        .unwrap();

    let issued = issued.borrow();
    assert_eq!(futures.len(), 2);
    assert_eq!(record.dependencies(), ["a".to_string(), "b".to_string()]);
    assert_eq!(issued[0].0, "a");
    assert_eq!(issued[1].0, "b");
    assert!(futures[0].ptr_eq(&issued[0].1));
    assert!(futures[1].ptr_eq(&issued[1].1));
    assert_eq!(record.resolve_cache_len(), 2);
}

#[test]
fn test_instantiate_fails_on_pending_dependency() {
    let linker = ModuleLinker::new();
    let record = linker.compile(r#"(import "x")"#, "mem:/m.asg").unwrap();
    linker
        .link(&record, |_: &str| -> LoaderResult<ModuleFuture> {
            Ok(Promise::pending())
        })
        .unwrap();

    let err = linker.instantiate(&record).unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Link(LinkError::Unresolved { ref specifier, .. }) if specifier == "x"
    ));
    assert!(err.to_string().contains("dependency not resolved"));
    assert_eq!(record.status(), ModuleStatus::Linking);
    assert_eq!(record.resolve_cache_len(), 0);
}

#[test]
fn test_instantiate_fails_on_missing_cache_entry() {
    let linker = ModuleLinker::new();
    let leaf = linker.compile("(export z) (let z 0)", "mem:/leaf.asg").unwrap();
    // Промежуточный модуль скомпилирован, но не связан: кэш пуст.
    let middle = linker
        .compile(r#"(import "./leaf" z)"#, "mem:/middle.asg")
        .unwrap();
    let root = linker.compile(r#"(import "./middle")"#, "mem:/root.asg").unwrap();

    link_and_wait(&linker, &root, settled_resolver(vec![("./middle", middle.clone())]));
    let err = linker.instantiate(&root).unwrap_err();

    assert!(matches!(
        err,
        LoaderError::Link(LinkError::NotInCache { ref url, .. }) if url == "mem:/middle.asg"
    ));
    assert!(err.to_string().contains("not in local cache"));
    assert_eq!(root.status(), ModuleStatus::Linking);
    assert_eq!(middle.status(), ModuleStatus::Compiled);
    assert_eq!(leaf.status(), ModuleStatus::Compiled);
}

#[test]
fn test_dependency_from_another_linker_is_unknown_module() {
    let engine = Engine::default();
    let first = ModuleLinker::with_engine(engine.clone());
    let second = ModuleLinker::with_engine(engine);
    // Зависимость зарегистрирована только во втором реестре.
    let dep = second
        .compile(r#"(import "./leaf")"#, "mem:/dep.asg")
        .unwrap();
    let main = first.compile(r#"(import "./dep")"#, "mem:/main.asg").unwrap();

    link_and_wait(&first, &main, settled_resolver(vec![("./dep", dep.clone())]));
    let err = first.instantiate(&main).unwrap_err();

    assert!(matches!(
        err,
        LoaderError::Link(LinkError::UnknownModule { ref url }) if url == "mem:/dep.asg"
    ));
    assert_eq!(
        err.to_string(),
        "linking error, unknown module (referrer mem:/dep.asg)"
    );
    assert_eq!(main.status(), ModuleStatus::Linking);
    assert_eq!(dep.status(), ModuleStatus::Compiled);
}

#[test]
fn test_instantiate_fails_on_rejected_dependency() {
    let linker = ModuleLinker::new();
    let record = linker.compile(r#"(import "gone")"#, "mem:/m.asg").unwrap();
    let futures = linker
        .link(&record, |specifier: &str| -> LoaderResult<ModuleFuture> {
            Ok(Promise::rejected(LoaderError::ModuleNotFound {
                specifier: specifier.to_string(),
                referrer: Some("mem:/m.asg".to_string()),
            }))
        })
        .unwrap();
    assert!(block_on(try_join_all(futures)).is_err());

    assert!(matches!(
        linker.instantiate(&record),
        Err(LoaderError::Link(LinkError::Rejected { .. }))
    ));
}

#[test]
fn test_instantiate_success_clears_caches() {
    let linker = ModuleLinker::new();
    let leaf = linker.compile("(export v) (let v 5)", "mem:/leaf.asg").unwrap();
    let middle = linker
        .compile(r#"(import "./leaf" v) (export w) (let w (* v 2))"#, "mem:/middle.asg")
        .unwrap();
    let root = linker
        .compile(r#"(import "./middle" w) (export out) (let out (+ w 1))"#, "mem:/root.asg")
        .unwrap();

    link_and_wait(&linker, &middle, settled_resolver(vec![("./leaf", leaf.clone())]));
    link_and_wait(&linker, &root, settled_resolver(vec![("./middle", middle.clone())]));
    assert_eq!(middle.resolve_cache_len(), 1);
    assert_eq!(root.resolve_cache_len(), 1);

    linker.instantiate(&root).unwrap();
    assert_eq!(root.resolve_cache_len(), 0);
    assert_eq!(middle.resolve_cache_len(), 0);
    assert_eq!(middle.status(), ModuleStatus::Instantiated);
    assert_eq!(leaf.status(), ModuleStatus::Instantiated);

    linker.evaluate(&root).unwrap();
    assert_eq!(linker.namespace(&root).unwrap().get("out"), Some(Value::Int(11)));
}

#[test]
fn test_missing_export_is_a_link_error() {
    let linker = ModuleLinker::new();
    let lib = linker.compile("(export x) (let x 1)", "mem:/lib.asg").unwrap();
    let main = linker.compile(r#"(import "./lib" nope)"#, "mem:/main.asg").unwrap();
    link_and_wait(&linker, &main, settled_resolver(vec![("./lib", lib)]));

    assert!(matches!(
        linker.instantiate(&main),
        Err(LoaderError::Link(LinkError::Engine { .. }))
    ));
    assert_eq!(main.status(), ModuleStatus::Linking);
}

#[test]
fn test_colliding_identities_link_correctly() {
    init_logging();
    let linker = ModuleLinker::with_engine(Engine::new(0));
    let a = linker
        .compile(r#"(import "./b" b) (export a) (let a (+ b 1))"#, "mem:/a.asg")
        .unwrap();
    let b = linker.compile("(export b) (let b 10)", "mem:/b.asg").unwrap();
    assert_eq!(a.identity(), b.identity());

    assert!(Rc::ptr_eq(&linker.lookup(a.module()).unwrap(), &a));
    assert!(Rc::ptr_eq(&linker.lookup(b.module()).unwrap(), &b));

    link_and_wait(&linker, &a, settled_resolver(vec![("./b", b.clone())]));
    linker.instantiate(&a).unwrap();
    linker.evaluate(&a).unwrap();
    assert_eq!(linker.namespace(&a).unwrap().get("a"), Some(Value::Int(11)));
}

#[test]
fn test_dropped_record_leaves_registry() {
    let linker = ModuleLinker::new();
    let record = linker.compile("(let x 1)", "mem:/m.asg").unwrap();
    let module = record.module().clone();
    assert_eq!(linker.registry_len(), 1);

    drop(record);
    assert_eq!(linker.registry_len(), 0);
    assert!(linker.lookup(&module).is_none());
}

#[test]
fn test_namespace_availability_by_status() {
    let linker = Rc::new(ModuleLinker::new());
    let record = linker
        .compile("(export x) (let x 1) (import-meta)", "mem:/m.asg")
        .unwrap();

    assert!(matches!(
        linker.namespace(&record),
        Err(LoaderError::State { status: ModuleStatus::Compiled, .. })
    ));
    linker.link(&record, no_dependencies).unwrap();
    let err = linker.namespace(&record).unwrap_err();
    assert!(err.to_string().contains("namespace unavailable before instantiation"));

    linker.instantiate(&record).unwrap();
    assert!(linker.namespace(&record).is_ok());

    // Во время выполнения тела запись находится в состоянии Evaluating.
    let observed: Rc<RefCell<Option<(ModuleStatus, bool)>>> = Rc::new(RefCell::new(None));
    let sink = observed.clone();
    let weak = Rc::downgrade(&linker);
    linker.set_import_meta_hook(move |record: &ModuleHandle, _meta: &Object| -> LoaderResult<()> {
        let namespace_ok = weak
            .upgrade()
            .map(|linker| linker.namespace(record).is_ok())
            .unwrap_or(false);
        *sink.borrow_mut() = Some((record.status(), namespace_ok));
        Ok(())
    });

    linker.evaluate(&record).unwrap();
    assert_eq!(*observed.borrow(), Some((ModuleStatus::Evaluating, true)));
    assert!(linker.namespace(&record).is_ok());
}

#[test]
fn test_evaluate_exception_is_passed_through() {
    let linker = ModuleLinker::new();
    let record = linker
        .compile(r#"(export x) (let x 1) (throw (array "bad" 42))"#, "mem:/m.asg")
        .unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();

    let err = linker.evaluate(&record).unwrap_err();
    let thrown = Value::Array(vec![Value::String("bad".to_string()), Value::Int(42)]);
    assert_eq!(err.exception(), Some(&thrown));
    assert_eq!(record.status(), ModuleStatus::Errored);
    assert!(linker.namespace(&record).is_err());

    // Повторное выполнение повторяет то же исключение.
    let again = linker.evaluate(&record).unwrap_err();
    assert_eq!(again.exception(), Some(&thrown));
}

#[test]
fn test_evaluate_requires_instantiation() {
    let linker = ModuleLinker::new();
    let record = linker.compile("(let x 1)", "mem:/m.asg").unwrap();
    linker.link(&record, no_dependencies).unwrap();
    assert!(matches!(
        linker.evaluate(&record),
        Err(LoaderError::State { status: ModuleStatus::Linking, .. })
    ));
}

#[test]
fn test_dynamic_import_hook_invoked_once_per_expression() {
    init_logging();
    let linker = ModuleLinker::new();
    let calls: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    linker.set_dynamic_import_hook(move |specifier: &str, referrer: &str| -> NamespaceFuture {
        log.borrow_mut()
            .push((specifier.to_string(), referrer.to_string()));
        Promise::pending()
    });

    let record = linker
        .compile(
            r#"
            (let first (dynamic-import "./lazy"))
            (let second (dynamic-import (str "./" "other")))
            "#,
            "mem:/app/main.asg",
        )
        .unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();
    linker.evaluate(&record).unwrap();

    assert_eq!(
        *calls.borrow(),
        vec![
            ("./lazy".to_string(), "mem:/app/main.asg".to_string()),
            ("./other".to_string(), "mem:/app/main.asg".to_string()),
        ]
    );
}

#[test]
fn test_dynamic_import_resolves_to_namespace() {
    let linker = ModuleLinker::new();
    let lazy = linker.compile("(export v) (let v 3)", "mem:/lazy.asg").unwrap();
    linker.link(&lazy, no_dependencies).unwrap();
    linker.instantiate(&lazy).unwrap();
    linker.evaluate(&lazy).unwrap();
    let lazy_namespace = linker.namespace(&lazy).unwrap();

    linker.set_dynamic_import_hook(move |_: &str, _: &str| -> NamespaceFuture {
        Promise::resolved(lazy_namespace.clone())
    });

    let main = linker
        .compile(r#"(export p) (let p (dynamic-import "./lazy"))"#, "mem:/main.asg")
        .unwrap();
    linker.link(&main, no_dependencies).unwrap();
    linker.instantiate(&main).unwrap();
    linker.evaluate(&main).unwrap();

    let promise = linker.namespace(&main).unwrap().get("p").unwrap();
    let resolved = block_on(promise.as_promise().unwrap().clone()).unwrap();
    assert_eq!(resolved.as_namespace().unwrap().get("v"), Some(Value::Int(3)));
}

#[test]
fn test_second_dynamic_import_hook_replaces_first() {
    let linker = ModuleLinker::new();
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let counter = first.clone();
    linker.set_dynamic_import_hook(move |_: &str, _: &str| -> NamespaceFuture {
        counter.set(counter.get() + 1);
        Promise::pending()
    });
    let counter = second.clone();
    linker.set_dynamic_import_hook(move |_: &str, _: &str| -> NamespaceFuture {
        counter.set(counter.get() + 1);
        Promise::pending()
    });

    let record = linker
        .compile(r#"(dynamic-import "./a") (dynamic-import "./b")"#, "mem:/m.asg")
        .unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();
    linker.evaluate(&record).unwrap();

    assert_eq!(first.get(), 0);
    assert_eq!(second.get(), 2);
}

#[test]
fn test_dynamic_import_without_hook_rejects() {
    let linker = ModuleLinker::new();
    let record = linker
        .compile(r#"(export p) (let p (dynamic-import "./x"))"#, "mem:/m.asg")
        .unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();
    linker.evaluate(&record).unwrap();

    let promise = linker.namespace(&record).unwrap().get("p").unwrap();
    assert!(block_on(promise.as_promise().unwrap().clone()).is_err());
}

#[test]
fn test_import_meta_hook_populates_object() {
    let linker = ModuleLinker::new();
    linker.set_import_meta_hook(|record: &ModuleHandle, meta: &Object| -> LoaderResult<()> {
        meta.set("url", Value::String(record.url().to_string()));
        Ok(())
    });

    let record = linker
        .compile(r#"(export here) (let here (get (import-meta) "url"))"#, "mem:/m.asg")
        .unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();
    linker.evaluate(&record).unwrap();

    assert_eq!(
        linker.namespace(&record).unwrap().get("here"),
        Some(Value::String("mem:/m.asg".to_string()))
    );
}

#[test]
fn test_import_meta_for_unknown_module_is_noop() {
    let linker = ModuleLinker::new();
    let called = Rc::new(Cell::new(false));
    let flag = called.clone();
    linker.set_import_meta_hook(move |_: &ModuleHandle, _: &Object| -> LoaderResult<()> {
        flag.set(true);
        Ok(())
    });

    // Модуль движка без записи в реестре.
    let module = SourceModule::compile(
        linker.context(),
        r#"(export keys) (let keys (import-meta))"#,
        "mem:/orphan.asg",
    )
    .unwrap();
    module.instantiate(&mut |_, _| Err(Value::Unit)).unwrap();
    module.evaluate().unwrap();

    assert!(!called.get());
    match module.namespace().get("keys") {
        Some(Value::Object(meta)) => assert!(meta.is_empty()),
        other => panic!("Expected meta object, got {:?}", other),
    }
}

#[test]
fn test_import_meta_hook_error_is_thrown_into_module() {
    let linker = ModuleLinker::new();
    linker.set_import_meta_hook(|_: &ModuleHandle, _: &Object| -> LoaderResult<()> {
        Err(LoaderError::Exception(Value::String("meta failed".to_string())))
    });

    let record = linker.compile("(import-meta)", "mem:/m.asg").unwrap();
    linker.link(&record, no_dependencies).unwrap();
    linker.instantiate(&record).unwrap();

    let err = linker.evaluate(&record).unwrap_err();
    assert_eq!(
        err.exception(),
        Some(&Value::String("meta failed".to_string()))
    );
    assert_eq!(record.status(), ModuleStatus::Errored);
}
