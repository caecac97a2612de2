//! Parser and resolver for the record description language.
//!
//! Source text is parsed with the pest grammar in `tablegen.pest` into a small
//! syntax tree, which is then resolved into [`Record`]s kept by a
//! [`RecordKeeper`]:
//!
//! * class declarations are kept as templates so that later records can
//!   instantiate them with their own template arguments, and are also
//!   resolved into a class record using the argument defaults;
//! * parent classes are applied most-base first, then the enclosing
//!   `let ... in` bindings, then the record body;
//! * field values are evaluated only once every override has been applied, so
//!   a field referring to another field sees its final value;
//! * every value is converted to the declared type of its field.
//!
//! Any failure aborts the whole parse; no partially built keeper escapes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use tracing::{debug, info, trace};

use crate::construct::{NameHasher, Record, RecordKeeper, RecordValue};
use crate::datatype::{
    DagArg, DagOperator, DagValue, ListValue, MaybeUnset, RecTy, RecordRef, Symbol, TypedValue,
};
use crate::error::{Location, Result, TableGenError};

#[derive(Parser)]
#[grammar = "tablegen.pest"]
pub struct TableGenParser;

// ------------- Syntax -------------
#[derive(Debug, Clone, Copy)]
enum BangOp {
    Add,
    Sub,
    StrConcat,
}

#[derive(Debug, Clone)]
enum Expr {
    Unset,
    Int(i64),
    Str(String),
    Code(String),
    // as written, most significant bit first
    Bits(Vec<Expr>, Location),
    List(Vec<Expr>, Option<RecTy>, Location),
    Dag(Box<Expr>, Vec<(Option<String>, Expr)>, Location),
    Bang(BangOp, Vec<Expr>, Location),
    Ident(String, Location),
    // a bound template argument, with the argument's declared type
    Value(Option<TypedValue>, RecTy),
}

type Bindings = HashMap<String, (RecTy, Option<TypedValue>), NameHasher>;

impl Expr {
    /// Replaces references to template arguments with their bound values.
    fn substitute(&self, bindings: &Bindings) -> Expr {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Expr::Ident(name, _) => match bindings.get(name) {
                Some((ty, value)) => Expr::Value(value.clone(), ty.clone()),
                None => self.clone(),
            },
            Expr::Bits(items, location) => Expr::Bits(
                items.iter().map(|item| item.substitute(bindings)).collect(),
                location.clone(),
            ),
            Expr::List(items, element, location) => Expr::List(
                items.iter().map(|item| item.substitute(bindings)).collect(),
                element.clone(),
                location.clone(),
            ),
            Expr::Dag(operator, args, location) => Expr::Dag(
                Box::new(operator.substitute(bindings)),
                args.iter()
                    .map(|(name, arg)| (name.clone(), arg.substitute(bindings)))
                    .collect(),
                location.clone(),
            ),
            Expr::Bang(op, args, location) => Expr::Bang(
                *op,
                args.iter().map(|arg| arg.substitute(bindings)).collect(),
                location.clone(),
            ),
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct TemplateParam {
    name: String,
    ty: RecTy,
    default: Option<Expr>,
}

#[derive(Debug, Clone)]
struct ParentRef {
    name: String,
    args: Vec<Expr>,
    location: Location,
}

#[derive(Debug, Clone)]
struct LetBinding {
    name: String,
    value: Expr,
    location: Location,
}

#[derive(Debug, Clone)]
enum BodyItem {
    Field {
        name: String,
        ty: RecTy,
        value: Option<Expr>,
        location: Location,
    },
    Let(LetBinding),
}

/// Everything needed to instantiate a class (or to build a def).
#[derive(Debug)]
struct ClassTemplate {
    name: String,
    params: Vec<TemplateParam>,
    parents: Vec<ParentRef>,
    // the `let ... in` bindings that enclosed the declaration
    lets: Vec<LetBinding>,
    body: Vec<BodyItem>,
}

// ------------- Draft -------------
#[derive(Debug)]
struct DraftField {
    name: String,
    ty: RecTy,
    value: Expr,
    location: Location,
}

/// A record under construction: fields still hold unevaluated expressions.
#[derive(Debug, Default)]
struct Draft {
    fields: Vec<DraftField>,
    lookup: HashMap<String, usize, NameHasher>,
    superclasses: Vec<String>,
    // the arguments each superclass was applied with
    instantiations: HashMap<String, Bindings, NameHasher>,
}

impl Draft {
    fn declare(
        &mut self,
        name: &str,
        ty: &RecTy,
        value: Option<Expr>,
        location: &Location,
    ) -> Result<()> {
        match self.lookup.get(name) {
            Some(&i) => {
                let field = &mut self.fields[i];
                if field.ty != *ty {
                    return Err(TableGenError::parse(
                        format!(
                            "Field '{}' redeclared as '{}', previously declared as '{}'",
                            name, ty, field.ty
                        ),
                        location,
                    ));
                }
                // a redeclaration without initializer keeps the inherited value
                if let Some(value) = value {
                    field.value = value;
                    field.location = location.clone();
                }
            }
            None => {
                self.lookup.insert(name.to_string(), self.fields.len());
                self.fields.push(DraftField {
                    name: name.to_string(),
                    ty: ty.clone(),
                    value: value.unwrap_or(Expr::Unset),
                    location: location.clone(),
                });
            }
        }
        Ok(())
    }
    fn set(&mut self, name: &str, value: Expr, location: &Location) -> Result<()> {
        let &i = self.lookup.get(name).ok_or_else(|| {
            TableGenError::parse(format!("Value '{}' unknown", name), location)
        })?;
        let field = &mut self.fields[i];
        field.value = value;
        field.location = location.clone();
        Ok(())
    }
    fn add_superclass(&mut self, name: &str) {
        if !self.is_subclass_of(name) {
            self.superclasses.push(name.to_string());
        }
    }
    fn is_subclass_of(&self, name: &str) -> bool {
        self.superclasses.iter().any(|superclass| superclass == name)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    InProgress,
    Done(Option<TypedValue>),
}

// Where identifiers are looked up while evaluating an expression.
enum Scope<'d> {
    Closed,
    Record {
        draft: &'d Draft,
        state: &'d mut Vec<Slot>,
    },
}

impl Scope<'_> {
    fn has_field(&self, name: &str) -> bool {
        match self {
            Scope::Closed => false,
            Scope::Record { draft, .. } => draft.lookup.contains_key(name),
        }
    }
    fn field_type(&self, name: &str) -> Option<&RecTy> {
        match self {
            Scope::Closed => None,
            Scope::Record { draft, .. } => draft.lookup.get(name).map(|&i| &draft.fields[i].ty),
        }
    }
}

// ------------- Engine -------------
pub struct Engine<'a> {
    include_paths: &'a [PathBuf],
    keeper: RecordKeeper,
    templates: HashMap<String, ClassTemplate, NameHasher>,
    // names usable as types, including the class being declared
    declared: HashSet<String, NameHasher>,
    lets: Vec<Vec<LetBinding>>,
    include_stack: Vec<PathBuf>,
    current_file: String,
    anonymous_count: usize,
}

impl<'a> Engine<'a> {
    pub const SOURCE_NAME: &'static str = "<source>";

    pub fn new(include_paths: &'a [PathBuf]) -> Self {
        Self {
            include_paths,
            keeper: RecordKeeper::new(),
            templates: HashMap::default(),
            declared: HashSet::default(),
            lets: Vec::new(),
            include_stack: Vec::new(),
            current_file: Self::SOURCE_NAME.to_string(),
            anonymous_count: 0,
        }
    }
    /// Names the main source in error locations (defaults to `<source>`).
    pub fn with_file_name(mut self, name: &str) -> Self {
        self.current_file = name.to_string();
        self
    }
    /// Parses and resolves `source`, consuming the engine.
    pub fn parse(mut self, source: &str) -> Result<RecordKeeper> {
        self.process_source(source)?;
        info!(
            classes = self.keeper.classes().len(),
            defs = self.keeper.defs().len(),
            "parsed records"
        );
        Ok(self.keeper)
    }

    fn process_source(&mut self, text: &str) -> Result<()> {
        let pairs = TableGenParser::parse(Rule::file, text)
            .map_err(|e| TableGenError::from(e.with_path(&self.current_file)))?;
        for file in pairs {
            self.statements(file.into_inner())?;
        }
        Ok(())
    }

    fn location(&self, pair: &Pair<Rule>) -> Location {
        Location::new(&self.current_file, pair.as_span().start_pos().line_col())
    }

    fn error(&self, message: impl Into<String>, pair: &Pair<Rule>) -> TableGenError {
        TableGenError::parse(message, &self.location(pair))
    }

    fn statements(&mut self, pairs: Pairs<Rule>) -> Result<()> {
        for pair in pairs {
            match pair.as_rule() {
                Rule::include => self.include(pair)?,
                Rule::class_decl => self.class_decl(pair)?,
                Rule::def_decl => self.def_decl(pair)?,
                Rule::let_block => self.let_block(pair)?,
                _ => (),
            }
        }
        Ok(())
    }

    // ------------- Statements -------------
    fn include(&mut self, pair: Pair<Rule>) -> Result<()> {
        let location = self.location(&pair);
        let mut file_name = None;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::string {
                file_name = Some(self.string_literal(&part)?);
            }
        }
        let file_name = file_name
            .ok_or_else(|| TableGenError::parse("Expected a file name", &location))?;
        let path = self.find_include(&file_name).ok_or_else(|| {
            TableGenError::parse(
                format!("Could not find include file '{}'", file_name),
                &location,
            )
        })?;
        let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.include_stack.contains(&canonical) {
            return Err(TableGenError::parse(
                format!("Recursive include of '{}'", path.display()),
                &location,
            ));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            TableGenError::parse(
                format!("Could not read include file '{}': {}", path.display(), e),
                &location,
            )
        })?;
        trace!(path = %path.display(), "including file");
        self.include_stack.push(canonical);
        let previous = std::mem::replace(&mut self.current_file, path.display().to_string());
        let result = self.process_source(&text);
        self.current_file = previous;
        self.include_stack.pop();
        result
    }

    // first match in include path order wins
    fn find_include(&self, file_name: &str) -> Option<PathBuf> {
        let direct = Path::new(file_name);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        self.include_paths
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
    }

    fn let_block(&mut self, pair: Pair<Rule>) -> Result<()> {
        let mut bindings = Vec::new();
        let mut scope = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::let_binding => bindings.push(self.let_binding(part)?),
                Rule::let_scope => scope = Some(part),
                _ => (),
            }
        }
        self.lets.push(bindings);
        let result = match scope {
            Some(scope) => self.statements(scope.into_inner()),
            None => Ok(()),
        };
        self.lets.pop();
        result
    }

    fn let_binding(&self, pair: Pair<Rule>) -> Result<LetBinding> {
        let location = self.location(&pair);
        let mut name = String::new();
        let mut value = Expr::Unset;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::kw_let => (),
                Rule::identifier => name = part.as_str().to_string(),
                _ => value = self.expr(part)?,
            }
        }
        Ok(LetBinding {
            name,
            value,
            location,
        })
    }

    fn active_lets(&self) -> Vec<LetBinding> {
        self.lets.iter().flatten().cloned().collect()
    }

    fn class_decl(&mut self, pair: Pair<Rule>) -> Result<()> {
        let location = self.location(&pair);
        let mut name = String::new();
        let mut params = Vec::new();
        let mut parents = Vec::new();
        let mut body = Vec::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::identifier => {
                    name = part.as_str().to_string();
                    if !self.declared.insert(name.clone()) {
                        return Err(self.error(format!("Class '{}' already defined", name), &part));
                    }
                }
                Rule::template_params => params = self.template_params(part)?,
                Rule::parent_list => parents = self.parent_list(part)?,
                Rule::body => body = self.body(part)?,
                _ => (),
            }
        }
        let template = ClassTemplate {
            name: name.clone(),
            params,
            parents,
            lets: self.active_lets(),
            body,
        };
        // the class record itself sees default arguments, or nothing
        let bindings = self.bind(&template, Vec::new(), &location, false)?;
        let mut draft = Draft::default();
        self.apply_template(&mut draft, &template, &bindings)?;
        let direct = direct_superclasses(&template.parents);
        let record = self.finish(draft, &name, false, true, direct, &location)?;
        self.keeper.keep_class(record);
        self.templates.insert(name.clone(), template);
        debug!(class = %name, "class defined");
        Ok(())
    }

    fn def_decl(&mut self, pair: Pair<Rule>) -> Result<()> {
        let location = self.location(&pair);
        let mut name = None;
        let mut parents = Vec::new();
        let mut body = Vec::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::identifier => name = Some(part.as_str().to_string()),
                Rule::parent_list => parents = self.parent_list(part)?,
                Rule::body => body = self.body(part)?,
                _ => (),
            }
        }
        let (name, anonymous) = match name {
            Some(name) => (name, false),
            None => {
                let name = format!("anonymous_{}", self.anonymous_count);
                self.anonymous_count += 1;
                (name, true)
            }
        };
        if self.keeper.defs().contains(&name) {
            return Err(TableGenError::parse(
                format!("def '{}' already defined", name),
                &location,
            ));
        }
        let template = ClassTemplate {
            name: name.clone(),
            params: Vec::new(),
            parents,
            lets: self.active_lets(),
            body,
        };
        let mut draft = Draft::default();
        self.apply_template(&mut draft, &template, &Bindings::default())?;
        let direct = direct_superclasses(&template.parents);
        let record = self.finish(draft, &name, anonymous, false, direct, &location)?;
        self.keeper.keep_def(record);
        debug!(def = %name, anonymous, "def defined");
        Ok(())
    }

    fn template_params(&self, pair: Pair<Rule>) -> Result<Vec<TemplateParam>> {
        let mut params: Vec<TemplateParam> = Vec::new();
        for param in pair.into_inner() {
            let mut name = String::new();
            let mut ty = RecTy::Int;
            let mut default = None;
            for part in param.clone().into_inner() {
                match part.as_rule() {
                    Rule::field_type => ty = self.field_type(part)?,
                    Rule::identifier => name = part.as_str().to_string(),
                    _ => default = Some(self.expr(part)?),
                }
            }
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(
                    format!("Template argument '{}' already defined", name),
                    &param,
                ));
            }
            params.push(TemplateParam { name, ty, default });
        }
        Ok(params)
    }

    fn parent_list(&self, pair: Pair<Rule>) -> Result<Vec<ParentRef>> {
        let mut parents = Vec::new();
        for parent in pair.into_inner() {
            let location = self.location(&parent);
            let mut name = String::new();
            let mut args = Vec::new();
            for part in parent.into_inner() {
                match part.as_rule() {
                    Rule::identifier => name = part.as_str().to_string(),
                    Rule::parent_args => {
                        for arg in part.into_inner() {
                            args.push(self.expr(arg)?);
                        }
                    }
                    _ => (),
                }
            }
            parents.push(ParentRef {
                name,
                args,
                location,
            });
        }
        Ok(parents)
    }

    fn body(&self, pair: Pair<Rule>) -> Result<Vec<BodyItem>> {
        let mut items = Vec::new();
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::field_let => items.push(BodyItem::Let(self.let_binding(item)?)),
                Rule::field_decl => {
                    let location = self.location(&item);
                    let mut name = String::new();
                    let mut ty = RecTy::Int;
                    let mut value = None;
                    for part in item.into_inner() {
                        match part.as_rule() {
                            Rule::kw_field => (),
                            Rule::field_type => ty = self.field_type(part)?,
                            Rule::identifier => name = part.as_str().to_string(),
                            _ => value = Some(self.expr(part)?),
                        }
                    }
                    items.push(BodyItem::Field {
                        name,
                        ty,
                        value,
                        location,
                    });
                }
                _ => (),
            }
        }
        Ok(items)
    }

    // ------------- Types and values -------------
    fn field_type(&self, pair: Pair<Rule>) -> Result<RecTy> {
        let Some(ty) = pair.into_inner().next() else {
            return Ok(RecTy::Int);
        };
        Ok(match ty.as_rule() {
            Rule::bit_type => RecTy::Bit,
            Rule::int_type => RecTy::Int,
            Rule::string_type => RecTy::String,
            Rule::code_type => RecTy::Code,
            Rule::dag_type => RecTy::Dag,
            Rule::bits_type => {
                let width = ty
                    .clone()
                    .into_inner()
                    .find(|part| part.as_rule() == Rule::decimal)
                    .map(|part| part.as_str().parse::<usize>())
                    .transpose()
                    .map_err(|_| self.error("Invalid bit width", &ty))?
                    .ok_or_else(|| self.error("Expected a bit width", &ty))?;
                RecTy::Bits(width)
            }
            Rule::list_type => {
                let element = ty
                    .clone()
                    .into_inner()
                    .find(|part| part.as_rule() == Rule::field_type)
                    .ok_or_else(|| self.error("Expected an element type", &ty))?;
                RecTy::List(Box::new(self.field_type(element)?))
            }
            _ => {
                let class = ty.as_str().to_string();
                if !self.declared.contains(&class) {
                    return Err(self.error(format!("Couldn't find class '{}'", class), &ty));
                }
                RecTy::Record(class)
            }
        })
    }

    fn expr(&self, pair: Pair<Rule>) -> Result<Expr> {
        let location = self.location(&pair);
        Ok(match pair.as_rule() {
            Rule::unset => Expr::Unset,
            Rule::boolean => {
                let truth = pair.into_inner().any(|part| part.as_rule() == Rule::kw_true);
                Expr::Int(truth as i64)
            }
            Rule::integer => Expr::Int(parse_integer(pair.as_str(), &location)?),
            Rule::string => Expr::Str(self.string_literal(&pair)?),
            Rule::code => {
                let text = pair.as_str();
                Expr::Code(text[2..text.len() - 2].to_string())
            }
            Rule::bits_init => Expr::Bits(self.exprs(pair.into_inner())?, location),
            Rule::list_init => {
                let mut items = Vec::new();
                let mut element = None;
                for part in pair.into_inner() {
                    if part.as_rule() == Rule::list_suffix {
                        if let Some(ty) = part.into_inner().next() {
                            element = Some(self.field_type(ty)?);
                        }
                    } else {
                        items.push(self.expr(part)?);
                    }
                }
                Expr::List(items, element, location)
            }
            Rule::dag_init => {
                let mut operator = None;
                let mut args = Vec::new();
                for part in pair.into_inner() {
                    match part.as_rule() {
                        Rule::dag_operator => {
                            if let Some(reference) = part.into_inner().next() {
                                operator = Some(self.expr(reference)?);
                            }
                        }
                        _ => args.push(self.dag_arg(part)?),
                    }
                }
                let operator = operator
                    .ok_or_else(|| TableGenError::parse("Expected a dag operator", &location))?;
                Expr::Dag(Box::new(operator), args, location)
            }
            Rule::bang_op => {
                let mut parts = pair.into_inner();
                let op = match parts.next().map(|name| name.as_str()) {
                    Some("!add") => BangOp::Add,
                    Some("!sub") => BangOp::Sub,
                    Some("!strconcat") => BangOp::StrConcat,
                    other => {
                        return Err(TableGenError::parse(
                            format!("Unknown operator '{}'", other.unwrap_or_default()),
                            &location,
                        ));
                    }
                };
                Expr::Bang(op, self.exprs(parts)?, location)
            }
            Rule::reference => Expr::Ident(pair.as_str().trim().to_string(), location),
            rule => {
                return Err(TableGenError::parse(
                    format!("Unexpected {:?}", rule),
                    &location,
                ));
            }
        })
    }

    fn exprs(&self, pairs: Pairs<Rule>) -> Result<Vec<Expr>> {
        pairs.map(|pair| self.expr(pair)).collect()
    }

    fn dag_arg(&self, pair: Pair<Rule>) -> Result<(Option<String>, Expr)> {
        let mut name = None;
        let mut value = Expr::Unset;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::var_name => name = Some(part.as_str()[1..].to_string()),
                _ => value = self.expr(part)?,
            }
        }
        Ok((name, value))
    }

    fn string_literal(&self, pair: &Pair<Rule>) -> Result<String> {
        let text = pair.as_str();
        unescape(&text[1..text.len() - 1], &self.location(pair))
    }

    // ------------- Instantiation -------------
    /// Binds template arguments positionally, falling back to defaults. When
    /// `strict` is false a missing argument is left unset instead of failing.
    fn bind(
        &self,
        template: &ClassTemplate,
        args: Vec<Option<TypedValue>>,
        location: &Location,
        strict: bool,
    ) -> Result<Bindings> {
        if args.len() > template.params.len() {
            return Err(TableGenError::parse(
                format!(
                    "Too many template arguments for class '{}': expected at most {}, got {}",
                    template.name,
                    template.params.len(),
                    args.len()
                ),
                location,
            ));
        }
        let mut args = args.into_iter();
        let mut bindings = Bindings::default();
        for param in &template.params {
            let value = match (args.next(), &param.default) {
                (Some(arg), _) => arg,
                (None, Some(default)) => {
                    self.evaluate(&default.substitute(&bindings), &mut Scope::Closed, Some(&param.ty))?
                }
                (None, None) if strict => {
                    return Err(TableGenError::parse(
                        format!(
                            "Value not specified for template argument '{}:{}'",
                            template.name, param.name
                        ),
                        location,
                    ));
                }
                (None, None) => None,
            };
            let what = format!("Template argument '{}:{}'", template.name, param.name);
            let value = convert(value, &param.ty, location, &what)?;
            bindings.insert(param.name.clone(), (param.ty.clone(), value));
        }
        Ok(bindings)
    }

    fn apply_template(
        &self,
        draft: &mut Draft,
        template: &ClassTemplate,
        bindings: &Bindings,
    ) -> Result<()> {
        for parent in &template.parents {
            self.inherit(draft, parent, bindings)?;
        }
        for binding in &template.lets {
            draft.set(&binding.name, binding.value.clone(), &binding.location)?;
        }
        for item in &template.body {
            match item {
                BodyItem::Field {
                    name,
                    ty,
                    value,
                    location,
                } => {
                    let value = value.as_ref().map(|value| value.substitute(bindings));
                    draft.declare(name, ty, value, location)?;
                }
                BodyItem::Let(binding) => {
                    draft.set(&binding.name, binding.value.substitute(bindings), &binding.location)?;
                }
            }
        }
        Ok(())
    }

    /// Applies a parent class, its arguments evaluated against the declared
    /// parameter types and the `outer` bindings of the inheriting class.
    fn inherit(&self, draft: &mut Draft, parent: &ParentRef, outer: &Bindings) -> Result<()> {
        let template = self.templates.get(&parent.name).ok_or_else(|| {
            TableGenError::parse(
                format!("Couldn't find class '{}'", parent.name),
                &parent.location,
            )
        })?;
        let mut args = Vec::with_capacity(parent.args.len());
        for (i, arg) in parent.args.iter().enumerate() {
            let expected = template.params.get(i).map(|param| &param.ty);
            args.push(self.evaluate(&arg.substitute(outer), &mut Scope::Closed, expected)?);
        }
        let bindings = self.bind(template, args, &parent.location, true)?;
        // a class reached along a second path is applied only once
        if let Some(previous) = draft.instantiations.get(&template.name) {
            if *previous != bindings {
                return Err(TableGenError::parse(
                    format!(
                        "Class '{}' inherited twice with different template arguments",
                        template.name
                    ),
                    &parent.location,
                ));
            }
            return Ok(());
        }
        self.apply_template(draft, template, &bindings)?;
        draft.add_superclass(&template.name);
        draft.instantiations.insert(template.name.clone(), bindings);
        Ok(())
    }

    fn finish(
        &self,
        draft: Draft,
        name: &str,
        anonymous: bool,
        class: bool,
        direct: Vec<String>,
        location: &Location,
    ) -> Result<Record> {
        let mut state = vec![Slot::Pending; draft.fields.len()];
        for i in 0..draft.fields.len() {
            self.resolve_field(&draft, i, &mut state)?;
        }
        let mut fields = Vec::with_capacity(draft.fields.len());
        for (field, slot) in draft.fields.into_iter().zip(state) {
            let value = match slot {
                Slot::Done(value) => value,
                _ => None,
            };
            fields.push(RecordValue::new(symbol(&field.name, &field.location)?, field.ty, value));
        }
        Ok(Record::new(
            symbol(name, location)?,
            anonymous,
            class,
            fields,
            draft.superclasses,
            direct,
        ))
    }

    fn resolve_field(
        &self,
        draft: &Draft,
        index: usize,
        state: &mut Vec<Slot>,
    ) -> Result<Option<TypedValue>> {
        let field = &draft.fields[index];
        match &state[index] {
            Slot::Done(value) => return Ok(value.clone()),
            Slot::InProgress => {
                return Err(TableGenError::parse(
                    format!("Circular reference to field '{}'", field.name),
                    &field.location,
                ));
            }
            Slot::Pending => (),
        }
        state[index] = Slot::InProgress;
        let value = {
            let mut scope = Scope::Record {
                draft,
                state: &mut *state,
            };
            self.evaluate(&field.value, &mut scope, Some(&field.ty))?
        };
        let what = format!("Field '{}'", field.name);
        let value = convert(value, &field.ty, &field.location, &what)?;
        state[index] = Slot::Done(value.clone());
        Ok(value)
    }

    // ------------- Evaluation -------------
    fn evaluate(
        &self,
        expr: &Expr,
        scope: &mut Scope,
        expected: Option<&RecTy>,
    ) -> Result<Option<TypedValue>> {
        Ok(match expr {
            Expr::Unset => None,
            Expr::Int(int) => Some(TypedValue::Int(*int)),
            Expr::Str(text) => Some(TypedValue::String(text.clone())),
            Expr::Code(text) => Some(TypedValue::Code(text.clone())),
            Expr::Value(value, _) => value.clone(),
            Expr::Ident(name, location) => self.lookup(name, scope, location)?,
            Expr::Bits(items, location) => {
                let mut msb_first = Vec::new();
                for item in items {
                    match self.evaluate(item, scope, None)? {
                        // an unset bits operand still spans its declared width
                        None => msb_first.extend(std::iter::repeat_n(None, unset_width(item, scope))),
                        Some(TypedValue::Bit(bit)) => msb_first.push(Some(bit)),
                        Some(TypedValue::Int(int @ (0 | 1))) => msb_first.push(Some(int == 1)),
                        Some(TypedValue::Bits(bits)) => msb_first.extend(bits.into_iter().rev()),
                        Some(other) => {
                            return Err(TableGenError::parse(
                                format!("Invalid bit value '{}'", other),
                                location,
                            ));
                        }
                    }
                }
                msb_first.reverse();
                Some(TypedValue::Bits(msb_first))
            }
            Expr::List(items, element, location) => {
                let declared = element.clone().or_else(|| expected.and_then(RecTy::element).cloned());
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.evaluate(item, scope, declared.as_ref())?.ok_or_else(|| {
                        TableGenError::parse("List elements cannot be unset", location)
                    })?;
                    values.push(value);
                }
                let element = match declared {
                    Some(element) => element,
                    None => common_type(&values).ok_or_else(|| {
                        TableGenError::parse("Cannot infer the type of an empty list", location)
                    })?,
                };
                let mut converted = Vec::with_capacity(values.len());
                for value in values {
                    let found = value.ty();
                    converted.push(value.convert_to(&element).ok_or_else(|| {
                        TableGenError::parse(
                            format!(
                                "List element of type '{}' is incompatible with list<{}>",
                                found, element
                            ),
                            location,
                        )
                    })?);
                }
                Some(TypedValue::List(ListValue::new(element, converted)))
            }
            Expr::Dag(operator, args, location) => {
                let operator = self.dag_operator(operator, scope, location)?;
                let mut values = Vec::with_capacity(args.len());
                for (name, arg) in args {
                    let name = name.as_deref().map(|name| symbol(name, location)).transpose()?;
                    let value = self.evaluate(arg, scope, None)?;
                    values.push(DagArg { name, value });
                }
                Some(TypedValue::Dag(DagValue::new(operator, values)))
            }
            Expr::Bang(op, args, location) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match self.evaluate(arg, scope, None)? {
                        Some(value) => values.push(value),
                        // an unset operand leaves the result unset
                        None => return Ok(None),
                    }
                }
                Some(bang(*op, values, location)?)
            }
        })
    }

    fn lookup(
        &self,
        name: &str,
        scope: &mut Scope,
        location: &Location,
    ) -> Result<Option<TypedValue>> {
        if let Scope::Record { draft, state } = scope {
            if let Some(&i) = draft.lookup.get(name) {
                return self.resolve_field(draft, i, state);
            }
        }
        match self.keeper.shared_def(name) {
            Some(record) => Ok(Some(TypedValue::Def(RecordRef::new(record)))),
            None => Err(TableGenError::parse(
                format!("Variable not defined: '{}'", name),
                location,
            )),
        }
    }

    fn dag_operator(
        &self,
        operator: &Expr,
        scope: &mut Scope,
        location: &Location,
    ) -> Result<DagOperator> {
        // an operator naming neither a field nor a def is kept as a plain name
        if let Expr::Ident(name, _) = operator {
            if !scope.has_field(name) && self.keeper.shared_def(name).is_none() {
                debug!(operator = %name, %location, "dag operator is not a def, kept as a name");
                return Ok(DagOperator::Name(symbol(name, location)?));
            }
        }
        match self.evaluate(operator, scope, None)? {
            Some(TypedValue::Def(record)) => Ok(DagOperator::Def(record)),
            Some(TypedValue::String(name)) => Ok(DagOperator::Name(symbol(&name, location)?)),
            other => Err(TableGenError::parse(
                format!("Invalid dag operator '{}'", MaybeUnset(other.as_ref())),
                location,
            )),
        }
    }
}

fn bang(op: BangOp, values: Vec<TypedValue>, location: &Location) -> Result<TypedValue> {
    let integer = |value: TypedValue| {
        let found = value.kind();
        value
            .convert_to(&RecTy::Int)
            .and_then(|int| int.as_int().ok())
            .ok_or_else(|| {
                TableGenError::parse(format!("Expected an int operand, found {}", found), location)
            })
    };
    match op {
        BangOp::Add => {
            let mut sum = 0i64;
            for value in values {
                sum = sum.wrapping_add(integer(value)?);
            }
            Ok(TypedValue::Int(sum))
        }
        BangOp::Sub => {
            if values.len() != 2 {
                return Err(TableGenError::parse("!sub expects two operands", location));
            }
            let mut values = values.into_iter();
            let lhs = values.next().map(integer).transpose()?.unwrap_or_default();
            let rhs = values.next().map(integer).transpose()?.unwrap_or_default();
            Ok(TypedValue::Int(lhs.wrapping_sub(rhs)))
        }
        BangOp::StrConcat => {
            let mut text = String::new();
            for value in &values {
                let part = value.as_str().map_err(|_| {
                    TableGenError::parse(
                        format!("Expected a string operand, found {}", value.kind()),
                        location,
                    )
                })?;
                text.push_str(part);
            }
            Ok(TypedValue::String(text))
        }
    }
}

fn convert(
    value: Option<TypedValue>,
    ty: &RecTy,
    location: &Location,
    what: &str,
) -> Result<Option<TypedValue>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let found = value.ty();
    match value.convert_to(ty) {
        Some(converted) => Ok(Some(converted)),
        None => Err(TableGenError::parse(
            format!(
                "{} of type '{}' is incompatible with initializer of type '{}'",
                what, ty, found
            ),
            location,
        )),
    }
}

// Bits an unset operand of a bit initializer stands for.
fn unset_width(item: &Expr, scope: &Scope) -> usize {
    let ty = match item {
        Expr::Ident(name, _) => scope.field_type(name),
        Expr::Value(None, ty) => Some(ty),
        _ => None,
    };
    match ty {
        Some(RecTy::Bits(width)) => *width,
        _ => 1,
    }
}

/// The element type of an untyped list: the most derived class every def
/// element shares, otherwise the type of the first element.
fn common_type(values: &[TypedValue]) -> Option<RecTy> {
    let first = values.first()?;
    let records = values
        .iter()
        .map(|value| value.as_record_ref().ok().and_then(RecordRef::get))
        .collect::<Option<Vec<_>>>();
    let Some(records) = records else {
        return Some(first.ty());
    };
    let shared = records[0]
        .superclasses()
        .iter()
        .rev()
        .find(|class| records.iter().all(|record| record.is_subclass_of(class)));
    Some(shared.map_or(RecTy::AnyRecord, |class| RecTy::Record(class.clone())))
}

fn direct_superclasses(parents: &[ParentRef]) -> Vec<String> {
    let mut direct: Vec<String> = Vec::with_capacity(parents.len());
    for parent in parents {
        if !direct.contains(&parent.name) {
            direct.push(parent.name.clone());
        }
    }
    direct
}

fn symbol(name: &str, location: &Location) -> Result<Symbol> {
    Symbol::new(name).ok_or_else(|| {
        TableGenError::parse(format!("Name '{}' contains a NUL byte", name.escape_default()), location)
    })
}

fn parse_integer(text: &str, location: &Location) -> Result<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(binary) = digits.strip_prefix("0b") {
        u64::from_str_radix(binary, 2)
    } else {
        digits.parse::<u64>()
    }
    .map_err(|_| TableGenError::parse(format!("Invalid integer '{}'", text), location))?;
    // wide literals wrap into the signed range
    let value = magnitude as i64;
    Ok(if negative { value.wrapping_neg() } else { value })
}

fn unescape(text: &str, location: &Location) -> Result<String> {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some('t') => unescaped.push('\t'),
            Some('\\') => unescaped.push('\\'),
            Some('"') => unescaped.push('"'),
            Some('\'') => unescaped.push('\''),
            other => {
                return Err(TableGenError::parse(
                    format!("Invalid escape sequence '\\{}'", other.unwrap_or(' ')),
                    location,
                ));
            }
        }
    }
    Ok(unescaped)
}

/// Parses `source` into a keeper, resolving includes against `include_paths`.
pub fn parse(source: &str, include_paths: &[PathBuf]) -> Result<RecordKeeper> {
    Engine::new(include_paths).parse(source)
}
