//! Скомпилированный модуль движка: компиляция, связывание графа, выполнение.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use super::interpreter::Evaluator;
use super::value::{Binding, Namespace, Object, Value};
use super::Context;
use crate::parser::{self, ParseError, SExpr, Span};

/// Состояние модуля внутри движка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Uninstantiated,
    Instantiating,
    Instantiated,
    Evaluating,
    Evaluated,
    Errored,
}

/// Объявление импорта.
#[derive(Debug, Clone)]
struct ImportEntry {
    specifier: String,
    kind: ImportKind,
}

#[derive(Debug, Clone)]
enum ImportKind {
    /// `(import "x")`
    Bare,
    /// `(import "x" a b)`
    Named(Vec<String>),
    /// `(import "x" :as ns)`
    Namespace(String),
}

/// Импортированная привязка после связывания.
#[derive(Clone)]
pub(crate) enum ImportedBinding {
    Cell(Binding),
    Namespace(Namespace),
}

/// Дескриптор скомпилированного модуля. Равенство — по идентичности.
#[derive(Clone)]
pub struct SourceModule(Rc<ModuleInner>);

struct ModuleInner {
    url: String,
    identity_hash: u32,
    context: Context,
    requests: Vec<String>,
    imports: Vec<ImportEntry>,
    locals: HashMap<String, Binding>,
    body: Vec<SExpr>,
    namespace: Namespace,
    status: Cell<Status>,
    linked: RefCell<HashMap<String, SourceModule>>,
    imported: RefCell<HashMap<String, ImportedBinding>>,
    meta: RefCell<Option<Object>>,
    exception: RefCell<Option<Value>>,
}

impl SourceModule {
    /// Скомпилировать исходный текст модуля в контексте `context`.
    pub fn compile(context: &Context, source: &str, url: &str) -> Result<Self, ParseError> {
        let forms = parser::parse_module(source)?;

        let mut requests: Vec<String> = Vec::new();
        let mut imports = Vec::new();
        let mut exports: Vec<(String, SExpr)> = Vec::new();
        let mut locals: HashMap<String, Binding> = HashMap::new();
        let mut declared_at: HashMap<String, Span> = HashMap::new();
        let mut imported_names = HashSet::new();
        let mut body = Vec::new();

        for form in forms {
            match form.form_name() {
                Some("import") => {
                    let entry = parse_import(&form)?;
                    if !requests.contains(&entry.specifier) {
                        requests.push(entry.specifier.clone());
                    }
                    let names: Vec<&String> = match &entry.kind {
                        ImportKind::Bare => Vec::new(),
                        ImportKind::Named(names) => names.iter().collect(),
                        ImportKind::Namespace(local) => vec![local],
                    };
                    for name in names {
                        if !imported_names.insert(name.clone()) {
                            return Err(ParseError::invalid_form(
                                form.span(),
                                "import",
                                format!("duplicate import binding '{}'", name),
                            ));
                        }
                    }
                    imports.push(entry);
                }
                Some("export") => {
                    let list = form.as_list().unwrap_or_default();
                    for item in &list[1..] {
                        let name = item.as_ident().ok_or_else(|| {
                            ParseError::invalid_form(item.span(), "export", "expected a binding name")
                        })?;
                        if exports.iter().any(|(existing, _)| existing == name) {
                            return Err(ParseError::invalid_form(
                                item.span(),
                                "export",
                                format!("duplicate export '{}'", name),
                            ));
                        }
                        exports.push((name.to_string(), item.clone()));
                    }
                }
                Some("let") => {
                    let list = form.as_list().unwrap_or_default();
                    let name = list.get(1).and_then(SExpr::as_ident).ok_or_else(|| {
                        ParseError::invalid_form(form.span(), "let", "expected (let name value)")
                    })?;
                    if list.len() != 3 {
                        return Err(ParseError::invalid_form(
                            form.span(),
                            "let",
                            "expected (let name value)",
                        ));
                    }
                    if locals.contains_key(name) {
                        return Err(ParseError::invalid_form(
                            form.span(),
                            "let",
                            format!("duplicate declaration of '{}'", name),
                        ));
                    }
                    locals.insert(name.to_string(), Rc::new(RefCell::new(None)));
                    declared_at.insert(name.to_string(), form.span());
                    body.push(form);
                }
                _ => body.push(form),
            }
        }

        if let Some((name, span)) = imported_names
            .iter()
            .find_map(|name| declared_at.get(name).map(|span| (name, *span)))
        {
            return Err(ParseError::invalid_form(
                span,
                "let",
                format!("'{}' is both imported and declared", name),
            ));
        }

        let mut namespace_exports = BTreeMap::new();
        for (name, item) in exports {
            let binding = locals.get(&name).cloned().ok_or_else(|| {
                ParseError::invalid_form(
                    item.span(),
                    "export",
                    format!("export of undeclared binding '{}'", name),
                )
            })?;
            namespace_exports.insert(name, binding);
        }

        Ok(Self(Rc::new(ModuleInner {
            url: url.to_string(),
            identity_hash: context.engine().next_identity_hash(),
            context: context.clone(),
            requests,
            imports,
            locals,
            body,
            namespace: Namespace::new(url.to_string(), namespace_exports),
            status: Cell::new(Status::Uninstantiated),
            linked: RefCell::new(HashMap::new()),
            imported: RefCell::new(HashMap::new()),
            meta: RefCell::new(None),
            exception: RefCell::new(None),
        })))
    }

    pub fn url(&self) -> &str {
        &self.0.url
    }

    /// Идентификатор модуля. Может совпадать у разных модулей.
    pub fn identity_hash(&self) -> u32 {
        self.0.identity_hash
    }

    /// Запрошенные спецификаторы в порядке объявления, без повторов.
    pub fn requests(&self) -> &[String] {
        &self.0.requests
    }

    pub fn status(&self) -> Status {
        self.0.status.get()
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    /// Пространство имён модуля.
    pub fn namespace(&self) -> Namespace {
        self.0.namespace.clone()
    }

    /// Исключение, с которым завершилось выполнение модуля.
    pub fn exception(&self) -> Option<Value> {
        self.0.exception.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Связать граф модулей, начиная с этого.
    ///
    /// `resolve` вызывается синхронно для каждого запроса каждого модуля,
    /// который ещё не связан, и должен вернуть модуль-зависимость. При
    /// ошибке все модули, затронутые обходом, возвращаются в
    /// [`Status::Uninstantiated`].
    pub fn instantiate(
        &self,
        resolve: &mut dyn FnMut(&SourceModule, &str) -> Result<SourceModule, Value>,
    ) -> Result<(), Value> {
        match self.status() {
            Status::Uninstantiated => {}
            Status::Errored => return Err(self.exception().unwrap_or(Value::Unit)),
            _ => return Ok(()),
        }

        let mut stack = Vec::new();
        let result = inner_link(self, resolve, &mut stack);
        for module in &stack {
            match result {
                Ok(()) => module.0.status.set(Status::Instantiated),
                Err(_) => module.reset_link(),
            }
        }
        result
    }

    /// Выполнить модуль (и ещё не выполненные зависимости).
    ///
    /// Повторный вызов для выполненного модуля возвращает unit, для
    /// модуля с ошибкой — то же исключение.
    pub fn evaluate(&self) -> Result<Value, Value> {
        match self.status() {
            Status::Uninstantiated | Status::Instantiating => Err(Value::Error(format!(
                "TypeError: module {} is not instantiated",
                self.url()
            ))),
            _ => inner_evaluate(self),
        }
    }

    /// Объект `import-meta`. Запоминается только после успешной
    /// инициализации хостом; при ошибке следующий вызов повторяет её.
    pub(crate) fn import_meta(&self) -> Result<Object, Value> {
        if let Some(meta) = self.0.meta.borrow().as_ref() {
            return Ok(meta.clone());
        }
        let meta = Object::new();
        self.0
            .context
            .engine()
            .initialize_import_meta(&self.0.context, self, &meta)?;
        *self.0.meta.borrow_mut() = Some(meta.clone());
        Ok(meta)
    }

    pub(crate) fn local(&self, name: &str) -> Option<&Binding> {
        self.0.locals.get(name)
    }

    pub(crate) fn imported(&self, name: &str) -> Option<ImportedBinding> {
        self.0.imported.borrow().get(name).cloned()
    }

    pub(crate) fn body(&self) -> &[SExpr] {
        &self.0.body
    }

    fn bind_imports(&self) -> Result<(), Value> {
        let linked = self.0.linked.borrow();
        let mut imported = self.0.imported.borrow_mut();

        for entry in &self.0.imports {
            let Some(dependency) = linked.get(&entry.specifier) else {
                return Err(Value::Error(format!(
                    "SyntaxError: '{}' was not linked",
                    entry.specifier
                )));
            };
            match &entry.kind {
                ImportKind::Bare => {}
                ImportKind::Named(names) => {
                    for name in names {
                        let binding = dependency.0.namespace.binding(name).ok_or_else(|| {
                            Value::Error(format!(
                                "SyntaxError: module '{}' does not provide an export named '{}'",
                                dependency.url(),
                                name
                            ))
                        })?;
                        imported.insert(name.clone(), ImportedBinding::Cell(binding));
                    }
                }
                ImportKind::Namespace(local) => {
                    imported.insert(
                        local.clone(),
                        ImportedBinding::Namespace(dependency.namespace()),
                    );
                }
            }
        }
        Ok(())
    }

    fn reset_link(&self) {
        self.0.status.set(Status::Uninstantiated);
        self.0.linked.borrow_mut().clear();
        self.0.imported.borrow_mut().clear();
    }

    fn fail(&self, exception: Value) {
        *self.0.exception.borrow_mut() = Some(exception);
        self.0.status.set(Status::Errored);
    }
}

fn parse_import(form: &SExpr) -> Result<ImportEntry, ParseError> {
    let list = form.as_list().unwrap_or_default();
    let invalid = |message: &str| ParseError::invalid_form(form.span(), "import", message);

    let specifier = list
        .get(1)
        .and_then(SExpr::as_string)
        .ok_or_else(|| invalid("expected a string specifier"))?
        .to_string();

    let rest = &list[2..];
    let kind = match rest {
        [] => ImportKind::Bare,
        [keyword, local] if keyword.as_keyword() == Some("as") => ImportKind::Namespace(
            local
                .as_ident()
                .ok_or_else(|| invalid("expected a namespace name after :as"))?
                .to_string(),
        ),
        names => ImportKind::Named(
            names
                .iter()
                .map(|name| name.as_ident().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("expected binding names"))?,
        ),
    };

    Ok(ImportEntry { specifier, kind })
}

fn inner_link(
    module: &SourceModule,
    resolve: &mut dyn FnMut(&SourceModule, &str) -> Result<SourceModule, Value>,
    stack: &mut Vec<SourceModule>,
) -> Result<(), Value> {
    if module.status() != Status::Uninstantiated {
        return Ok(());
    }
    module.0.status.set(Status::Instantiating);
    stack.push(module.clone());

    for specifier in module.requests() {
        let dependency = resolve(module, specifier)?;
        module
            .0
            .linked
            .borrow_mut()
            .insert(specifier.clone(), dependency.clone());
        if dependency.status() == Status::Errored {
            return Err(dependency.exception().unwrap_or(Value::Unit));
        }
        inner_link(&dependency, resolve, stack)?;
    }

    module.bind_imports()
}

fn inner_evaluate(module: &SourceModule) -> Result<Value, Value> {
    match module.status() {
        Status::Evaluated | Status::Evaluating => return Ok(Value::Unit),
        Status::Errored => return Err(module.exception().unwrap_or(Value::Unit)),
        _ => {}
    }
    module.0.status.set(Status::Evaluating);

    let dependencies: Vec<SourceModule> = {
        let linked = module.0.linked.borrow();
        module
            .requests()
            .iter()
            .filter_map(|specifier| linked.get(specifier).cloned())
            .collect()
    };
    for dependency in dependencies {
        if let Err(exception) = inner_evaluate(&dependency) {
            module.fail(exception.clone());
            return Err(exception);
        }
    }

    match Evaluator::new(module).run() {
        Ok(value) => {
            module.0.status.set(Status::Evaluated);
            Ok(value)
        }
        Err(exception) => {
            module.fail(exception.clone());
            Err(exception)
        }
    }
}

impl PartialEq for SourceModule {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SourceModule {}

impl fmt::Debug for SourceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceModule")
            .field("url", &self.0.url)
            .field("identity_hash", &self.0.identity_hash)
            .field("status", &self.status())
            .finish()
    }
}
