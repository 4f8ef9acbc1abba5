//! In-memory [`ChurnBackend`] for exercising the drivers without a server.
//!
//! Supports the subset of filters and update operators the drivers issue:
//! empty filters, `$sampleRate`, `_id: { $in: [...] }`, and `$set`, `$inc`,
//! `$rename`, `$currentDate`. Update pipelines are evaluated for `$addFields`
//! / `$set` stages over `$rand`, `$cond`, `$and`, `$not`, `$eq`, `$gte`, `$lt`,
//! `$type`, `$add`, `$multiply`, top-level field paths, `$$NOW` and `$$REMOVE`.
//! Updates report every matched document as modified.

use crate::backend::{BatchWriteOptions, ChurnBackend, CommandTarget, IdUpdate, UpdateSpec};
use crate::error::{ChurnError, NAMESPACE_EXISTS};
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use churn_core::StopFlag;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Server error code for duplicate keys.
const DUPLICATE_KEY: i32 = 11000;

/// Kind of backend call, as recorded in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Command,
    EstimatedCount,
    Insert,
    UpdateMatching,
    UpdateByIds,
    SampleIds,
    DeleteMatching,
}

impl OpKind {
    /// Whether this call writes to a collection.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            OpKind::Insert | OpKind::UpdateMatching | OpKind::UpdateByIds | OpKind::DeleteMatching
        )
    }
}

#[derive(Default)]
struct MemoryCollection {
    docs: Vec<Document>,
    keys: HashSet<String>,
}

enum Filter {
    All,
    SampleRate(f64),
    Ids(HashSet<String>),
}

struct State {
    collections: HashMap<String, MemoryCollection>,
    ops: Vec<(OpKind, String)>,
    commands: Vec<Document>,
    failures: HashMap<OpKind, u32>,
    trips: Vec<(OpKind, StopFlag)>,
    stop_tripped_at: Option<usize>,
    last_batch_options: Option<BatchWriteOptions>,
    rng: StdRng,
}

/// In-memory backend with an operation log, failure injection and stop-flag hooks.
pub struct MemoryBackend {
    version: String,
    shards: Option<Vec<String>>,
    chunk_shards: Option<Vec<String>>,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Unsharded backend reporting `version` from `buildInfo`.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            shards: None,
            chunk_shards: None,
            state: Mutex::new(State {
                collections: HashMap::new(),
                ops: Vec::new(),
                commands: Vec::new(),
                failures: HashMap::new(),
                trips: Vec::new(),
                stop_tripped_at: None,
                last_batch_options: None,
                rng: StdRng::seed_from_u64(42),
            }),
        }
    }

    /// Answer `listShards` with these shard names.
    pub fn with_shards(mut self, shards: &[&str]) -> Self {
        self.shards = Some(shards.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Report chunks only on these shards instead of on every shard.
    pub fn with_chunk_shards(mut self, shards: &[&str]) -> Self {
        self.chunk_shards = Some(shards.iter().map(|s| s.to_string()).collect());
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory backend lock poisoned")
    }

    /// Insert `count` documents with generated ids.
    pub fn seed_collection(&self, name: &str, count: usize) {
        let mut state = self.lock();
        let collection = state.collections.entry(name.to_string()).or_default();
        for i in 0..count {
            let id = Bson::ObjectId(ObjectId::new());
            collection.keys.insert(key_of(&id));
            collection.docs.push(doc! { "_id": id, "seed": i as i64 });
        }
    }

    /// Fail the next `times` calls of `kind`.
    pub fn fail_next(&self, kind: OpKind, times: u32) {
        *self.lock().failures.entry(kind).or_default() += times;
    }

    /// Request a stop on `flag` while the first call of `kind` runs. The call
    /// itself completes normally.
    pub fn trip_stop_on(&self, kind: OpKind, flag: StopFlag) {
        self.lock().trips.push((kind, flag));
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock()
            .collections
            .get(name)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.lock().collections.contains_key(name)
    }

    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(name)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    pub fn op_kinds(&self) -> Vec<OpKind> {
        self.lock().ops.iter().map(|(kind, _)| *kind).collect()
    }

    /// Calls made against one collection, in order.
    pub fn ops_on(&self, collection: &str) -> Vec<OpKind> {
        self.lock()
            .ops
            .iter()
            .filter(|(_, c)| c == collection)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Calls recorded after a tripped stop request, or `None` if none tripped.
    pub fn ops_after_stop(&self) -> Option<Vec<OpKind>> {
        let state = self.lock();
        state
            .stop_tripped_at
            .map(|at| state.ops[at..].iter().map(|(kind, _)| *kind).collect())
    }

    /// First key of every command run, in order.
    pub fn command_names(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter_map(|c| c.keys().next().cloned())
            .collect()
    }

    pub fn last_batch_options(&self) -> Option<BatchWriteOptions> {
        self.lock().last_batch_options
    }

    /// Record a call, applying injected failures and stop trips.
    fn begin(&self, state: &mut State, kind: OpKind, collection: &str) -> Result<(), ChurnError> {
        state.ops.push((kind, collection.to_string()));

        if let Some(pos) = state.trips.iter().position(|(k, _)| *k == kind) {
            let (_, flag) = state.trips.remove(pos);
            flag.request();
            state.stop_tripped_at = Some(state.ops.len());
        }

        if let Some(remaining) = state.failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChurnError::Command {
                    code: 1,
                    message: format!("injected {kind:?} failure"),
                });
            }
        }
        Ok(())
    }
}

fn key_of(id: &Bson) -> String {
    id.to_string()
}

fn parse_filter(filter: &Document) -> Result<Filter, ChurnError> {
    if filter.is_empty() {
        return Ok(Filter::All);
    }
    if let Some(rate) = filter.get("$sampleRate").and_then(Bson::as_f64) {
        return Ok(Filter::SampleRate(rate));
    }
    if let Ok(ids) = filter
        .get_document("_id")
        .and_then(|id| id.get_array("$in"))
    {
        return Ok(Filter::Ids(ids.iter().map(key_of).collect()));
    }
    Err(ChurnError::Command {
        code: 2,
        message: format!("unsupported filter {filter}"),
    })
}

fn matches(filter: &Filter, doc: &Document, rng: &mut StdRng) -> bool {
    match filter {
        Filter::All => true,
        Filter::SampleRate(rate) => rng.random::<f64>() < *rate,
        Filter::Ids(ids) => doc.get("_id").is_some_and(|id| ids.contains(&key_of(id))),
    }
}

fn as_number(value: &Bson) -> f64 {
    match value {
        Bson::Int32(n) => *n as f64,
        Bson::Int64(n) => *n as f64,
        Bson::Double(n) => *n,
        _ => 0.0,
    }
}

fn increment(current: Option<&Bson>, by: &Bson) -> Bson {
    match (current, by) {
        (None, by) => by.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Bson::Int32(a + b),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Some(a), b) => Bson::Double(as_number(a) + as_number(b)),
    }
}

fn apply_update(doc: &mut Document, update: &Document) {
    for (operator, fields) in update {
        let Some(fields) = fields.as_document() else {
            continue;
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    doc.insert(field.clone(), value.clone());
                }
            }
            "$inc" => {
                for (field, by) in fields {
                    let value = increment(doc.get(field), by);
                    doc.insert(field.clone(), value);
                }
            }
            "$rename" => {
                for (from, to) in fields {
                    if let (Some(to), true) = (to.as_str(), doc.contains_key(from)) {
                        if let Some(value) = doc.remove(from) {
                            doc.insert(to, value);
                        }
                    }
                }
            }
            "$currentDate" => {
                for (field, _) in fields {
                    doc.insert(field.clone(), bson::DateTime::now());
                }
            }
            _ => {}
        }
    }
}

fn unsupported(what: String) -> ChurnError {
    ChurnError::Command {
        code: 2,
        message: format!("unsupported pipeline expression {what}"),
    }
}

fn truthy(value: &Option<Bson>) -> bool {
    match value {
        None | Some(Bson::Null) => false,
        Some(Bson::Boolean(b)) => *b,
        Some(Bson::Int32(n)) => *n != 0,
        Some(Bson::Int64(n)) => *n != 0,
        Some(Bson::Double(n)) => *n != 0.0,
        Some(_) => true,
    }
}

fn type_name(value: &Option<Bson>) -> &'static str {
    match value {
        None => "missing",
        Some(Bson::Null) => "null",
        Some(Bson::Double(_)) => "double",
        Some(Bson::Int32(_)) => "int",
        Some(Bson::Int64(_)) => "long",
        Some(Bson::String(_)) => "string",
        Some(Bson::Boolean(_)) => "bool",
        Some(Bson::DateTime(_)) => "date",
        Some(Bson::Array(_)) => "array",
        Some(_) => "object",
    }
}

fn operands<'a>(
    operator: &str,
    args: &'a Bson,
    count: usize,
) -> Result<&'a bson::Array, ChurnError> {
    match args.as_array() {
        Some(args) if args.len() == count => Ok(args),
        _ => Err(unsupported(format!("{operator} {args}"))),
    }
}

fn is_number(value: &Option<Bson>) -> bool {
    matches!(
        value,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_))
    )
}

/// Evaluate an aggregation expression against `doc`. `None` is a missing
/// value, which `$$REMOVE` also produces.
fn eval(expr: &Bson, doc: &Document, rng: &mut StdRng) -> Result<Option<Bson>, ChurnError> {
    match expr {
        Bson::String(s) if s == "$$NOW" => Ok(Some(Bson::DateTime(bson::DateTime::now()))),
        Bson::String(s) if s == "$$REMOVE" => Ok(None),
        Bson::String(s) if s.starts_with("$$") => Err(unsupported(s.clone())),
        Bson::String(s) if s.starts_with('$') => Ok(doc.get(&s[1..]).cloned()),
        Bson::Document(d) if d.len() == 1 && d.keys().all(|k| k.starts_with('$')) => {
            let Some((operator, args)) = d.iter().next() else {
                return Err(unsupported(d.to_string()));
            };
            match operator.as_str() {
                "$rand" => Ok(Some(Bson::Double(rng.random::<f64>()))),
                "$cond" => {
                    let args = operands(operator, args, 3)?;
                    if truthy(&eval(&args[0], doc, rng)?) {
                        eval(&args[1], doc, rng)
                    } else {
                        eval(&args[2], doc, rng)
                    }
                }
                "$and" => {
                    let args = args
                        .as_array()
                        .ok_or_else(|| unsupported(format!("$and {args}")))?;
                    for arg in args {
                        if !truthy(&eval(arg, doc, rng)?) {
                            return Ok(Some(Bson::Boolean(false)));
                        }
                    }
                    Ok(Some(Bson::Boolean(true)))
                }
                "$not" => {
                    let args = operands(operator, args, 1)?;
                    Ok(Some(Bson::Boolean(!truthy(&eval(&args[0], doc, rng)?))))
                }
                "$eq" | "$gte" | "$lt" => {
                    let args = operands(operator, args, 2)?;
                    let left = eval(&args[0], doc, rng)?;
                    let right = eval(&args[1], doc, rng)?;
                    let result = if is_number(&left) && is_number(&right) {
                        let (l, r) = (
                            left.as_ref().map(as_number).unwrap_or_default(),
                            right.as_ref().map(as_number).unwrap_or_default(),
                        );
                        match operator.as_str() {
                            "$eq" => l == r,
                            "$gte" => l >= r,
                            _ => l < r,
                        }
                    } else if operator == "$eq" {
                        left == right
                    } else {
                        return Err(unsupported(format!("{operator} on non-numbers")));
                    };
                    Ok(Some(Bson::Boolean(result)))
                }
                "$type" => {
                    let value = eval(args, doc, rng)?;
                    Ok(Some(Bson::String(type_name(&value).to_string())))
                }
                "$add" | "$multiply" => {
                    let args = operands(operator, args, 2)?;
                    let left = eval(&args[0], doc, rng)?;
                    let right = eval(&args[1], doc, rng)?;
                    match (&left, &right) {
                        (Some(l), Some(r)) if is_number(&left) && is_number(&right) => {
                            Ok(Some(match (operator.as_str(), l, r) {
                                ("$add", Bson::Int32(a), Bson::Int32(b)) => a
                                    .checked_add(*b)
                                    .map(Bson::Int32)
                                    .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
                                ("$add", _, _) => Bson::Double(as_number(l) + as_number(r)),
                                _ => Bson::Double(as_number(l) * as_number(r)),
                            }))
                        }
                        _ => Ok(Some(Bson::Null)),
                    }
                }
                other => Err(unsupported(other.to_string())),
            }
        }
        literal => Ok(Some(literal.clone())),
    }
}

/// Apply `$addFields` / `$set` stages. Every expression of a stage sees the
/// document as it was when the stage started.
fn apply_pipeline(doc: &mut Document, stages: &[Document], rng: &mut StdRng) -> Result<(), ChurnError> {
    for stage in stages {
        let fields = match stage.iter().next() {
            Some((name, Bson::Document(fields))) if name == "$addFields" || name == "$set" => fields,
            _ => return Err(unsupported(stage.to_string())),
        };

        let mut values = Vec::with_capacity(fields.len());
        for (field, expr) in fields {
            values.push((field.clone(), eval(expr, doc, rng)?));
        }
        for (field, value) in values {
            match value {
                Some(value) => {
                    doc.insert(field, value);
                }
                None => {
                    doc.remove(&field);
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ChurnBackend for MemoryBackend {
    async fn run_command(
        &self,
        _target: CommandTarget,
        command: Document,
    ) -> Result<Document, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::Command, "")?;
        state.commands.push(command.clone());

        let name = command.keys().next().cloned().unwrap_or_default();
        match name.as_str() {
            "buildInfo" => Ok(doc! { "version": self.version.as_str(), "ok": 1.0 }),
            "listShards" => match &self.shards {
                Some(shards) => {
                    let shards: Vec<Document> =
                        shards.iter().map(|s| doc! { "_id": s.as_str() }).collect();
                    Ok(doc! { "shards": shards, "ok": 1.0 })
                }
                None => Err(ChurnError::Command {
                    code: 59,
                    message: "no such command: 'listShards'".to_string(),
                }),
            },
            "create" => {
                let collection = command.get_str("create").unwrap_or_default().to_string();
                if state.collections.contains_key(&collection) {
                    return Err(ChurnError::Command {
                        code: NAMESPACE_EXISTS,
                        message: format!("Collection {collection} already exists"),
                    });
                }
                state.collections.insert(collection, MemoryCollection::default());
                Ok(doc! { "ok": 1.0 })
            }
            // config.collections lookups find no uuid
            "find" => Ok(doc! { "cursor": { "firstBatch": [], "id": 0_i64 }, "ok": 1.0 }),
            // config.chunks grouped by shard
            "aggregate" => {
                let groups: Vec<Document> = self
                    .chunk_shards
                    .as_ref()
                    .or(self.shards.as_ref())
                    .map(|shards| shards.iter().map(|s| doc! { "_id": s.as_str() }).collect())
                    .unwrap_or_default();
                Ok(doc! { "cursor": { "firstBatch": groups, "id": 0_i64 }, "ok": 1.0 })
            }
            _ => Ok(doc! { "ok": 1.0 }),
        }
    }

    async fn estimated_count(&self, collection: &str) -> Result<u64, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::EstimatedCount, collection)?;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.docs.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::Insert, collection)?;

        let total = documents.len() as u64;
        let target = state.collections.entry(collection.to_string()).or_default();
        let mut inserted = 0;
        for mut doc in documents {
            if !doc.contains_key("_id") {
                doc.insert("_id", ObjectId::new());
            }
            let key = doc.get("_id").map(key_of).unwrap_or_default();
            if target.keys.insert(key) {
                target.docs.push(doc);
                inserted += 1;
            }
        }

        if total > 0 && inserted == 0 {
            return Err(ChurnError::Command {
                code: DUPLICATE_KEY,
                message: "E11000 duplicate key error".to_string(),
            });
        }
        Ok(inserted)
    }

    async fn update_matching(
        &self,
        collection: &str,
        filter: Document,
        update: UpdateSpec,
    ) -> Result<u64, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::UpdateMatching, collection)?;
        let filter = parse_filter(&filter)?;

        let State {
            collections, rng, ..
        } = &mut *state;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut modified = 0;
        for doc in target.docs.iter_mut() {
            if matches(&filter, doc, rng) {
                match &update {
                    UpdateSpec::Document(update) => apply_update(doc, update),
                    UpdateSpec::Pipeline(stages) => apply_pipeline(doc, stages, rng)?,
                }
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn update_by_ids(
        &self,
        collection: &str,
        updates: Vec<IdUpdate>,
        options: BatchWriteOptions,
    ) -> Result<u64, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::UpdateByIds, collection)?;
        state.last_batch_options = Some(options);

        let Some(target) = state.collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions: HashMap<String, usize> = target
            .docs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.get("_id").map(|id| (key_of(id), i)))
            .collect();

        let mut modified = 0;
        for IdUpdate { id, update } in updates {
            if let Some(&i) = positions.get(&key_of(&id)) {
                apply_update(&mut target.docs[i], &update);
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn sample_ids(&self, collection: &str, size: u64) -> Result<Vec<Bson>, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::SampleIds, collection)?;

        let State {
            collections, rng, ..
        } = &mut *state;
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let amount = (size as usize).min(target.docs.len());
        Ok(rand::seq::index::sample(rng, target.docs.len(), amount)
            .into_iter()
            .filter_map(|i| target.docs[i].get("_id").cloned())
            .collect())
    }

    async fn delete_matching(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, ChurnError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        self.begin(&mut state, OpKind::DeleteMatching, collection)?;
        let filter = parse_filter(&filter)?;

        let State {
            collections, rng, ..
        } = &mut *state;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = target.docs.len();
        let mut removed = Vec::new();
        target.docs.retain(|doc| {
            if matches(&filter, doc, rng) {
                removed.push(doc.get("_id").map(key_of).unwrap_or_default());
                false
            } else {
                true
            }
        });
        for key in removed {
            target.keys.remove(&key);
        }
        Ok((before - target.docs.len()) as u64)
    }
}
