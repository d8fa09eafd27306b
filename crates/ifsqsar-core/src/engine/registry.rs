use super::cache::ResultCache;
use super::combiners::{BUILTIN_COMBINERS, CombineFn, CombineInputs, DependencyResults};
use super::context::EvaluationContext;
use super::domain;
use super::error::EngineError;
use super::featurizer::featurize;
use super::interpreter::Interpreter;
use crate::core::io::source::{CatalogEntry, ModelSource};
use crate::core::models::definition::{
    DefinitionError, MetaDefinition, Metadata, ModelDefinition, ModelSpec, StructureFlag,
};
use crate::core::models::ids::ModelId;
use crate::core::models::result::QsarResult;
use crate::core::models::uncertainty::UncertaintyLevel;
use crate::core::structure::{StructureError, StructureMatcher};
use slotmap::SlotMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Direct,
    Meta,
}

/// Which neighbours of a model a cache-lifecycle operation also visits.
///
/// `down` walks into dependencies and `up` into dependent meta-models. Each walk keeps
/// its own direction: a model reached going down is never walked up from, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Propagation {
    pub down: bool,
    pub up: bool,
}

impl Propagation {
    pub const NONE: Self = Self {
        down: false,
        up: false,
    };
    pub const DOWN: Self = Self {
        down: true,
        up: false,
    };
    pub const UP: Self = Self {
        down: false,
        up: true,
    };
    pub const BOTH: Self = Self {
        down: true,
        up: true,
    };
}

/// A value supplied by the user for one structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Option<f64>,
    /// Validated on insertion: `E`, `U` and one digit 0-6, each at most once.
    pub level: String,
    pub error: Option<f64>,
    pub note: String,
    pub citation: String,
}

impl StoredValue {
    pub fn user(value: f64) -> Self {
        Self {
            value: Some(value),
            level: "U".to_string(),
            error: None,
            note: "user value".to_string(),
            citation: "user value".to_string(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_error(mut self, error: f64) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = citation.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Solute,
    Component,
    Solvent,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Solute => "solute",
            Role::Component => "component",
            Role::Solvent => "solvent",
        }
    }
}

#[derive(Debug)]
struct MetaModel {
    definition: MetaDefinition,
    combiner: CombineFn,
    solutes: Vec<(String, ModelId)>,
    components: Vec<(String, ModelId)>,
    solvents: Vec<(String, ModelId)>,
}

impl MetaModel {
    fn dependency_ids(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.solutes
            .iter()
            .chain(&self.components)
            .chain(&self.solvents)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug)]
enum LoadedModel {
    Direct(Box<ModelDefinition>),
    Meta(Arc<MetaModel>),
}

#[derive(Debug)]
enum LoadState {
    Unloaded,
    Loading,
    Loaded(LoadedModel),
}

#[derive(Debug)]
struct RegistryEntry {
    catalog: CatalogEntry,
    state: LoadState,
    cache: ResultCache,
    super_models: Vec<ModelId>,
}

/// Owns every catalogued model, its result cache and the links between meta-models and
/// their dependencies.
///
/// Definitions are read from the [`ModelSource`] on first use. Loading a meta-model loads
/// its dependencies and records it in each dependency's list of super-models, so cache
/// operations can be propagated in either direction.
pub struct ModelRegistry {
    source: Box<dyn ModelSource>,
    entries: SlotMap<ModelId, RegistryEntry>,
    order: Vec<ModelId>,
    by_name: HashMap<String, Vec<(u32, ModelId)>>,
    combiners: HashMap<String, CombineFn>,
}

/// Splits `name@version` into its parts; a plain name has no version.
fn split_request(request: &str) -> (&str, Option<&str>) {
    match request.split_once('@') {
        Some((name, version)) => (name.trim(), Some(version.trim())),
        None => (request.trim(), None),
    }
}

impl ModelRegistry {
    /// Reads the catalog of `source`. No definition is loaded yet.
    pub fn new<S: ModelSource + 'static>(source: S) -> Result<Self, EngineError> {
        let catalog = source.catalog()?;
        let mut entries = SlotMap::with_key();
        let mut order = Vec::with_capacity(catalog.len());
        let mut by_name: HashMap<String, Vec<(u32, ModelId)>> = HashMap::new();

        for entry in catalog {
            let name = entry.name.clone();
            let version = entry.version;
            let id = entries.insert(RegistryEntry {
                catalog: entry,
                state: LoadState::Unloaded,
                cache: ResultCache::new(),
                super_models: Vec::new(),
            });
            by_name.entry(name).or_default().push((version, id));
            order.push(id);
        }
        for versions in by_name.values_mut() {
            versions.sort_by_key(|(version, _)| *version);
        }

        info!(models = order.len(), "Read model catalog");
        Ok(Self {
            source: Box::new(source),
            entries,
            order,
            by_name,
            combiners: HashMap::new(),
        })
    }

    /// Makes `combiner` available to meta-models under `name`, shadowing a built-in of the
    /// same name. Only affects models loaded afterwards.
    pub fn register_combiner(&mut self, name: &str, combiner: CombineFn) {
        self.combiners.insert(name.to_string(), combiner);
    }

    fn combiner(&self, name: &str) -> Option<CombineFn> {
        self.combiners
            .get(name)
            .copied()
            .or_else(|| BUILTIN_COMBINERS.get(name).copied())
    }

    /// Every catalogued model, in catalog order.
    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.order.iter().copied()
    }

    /// Resolves `name` to its highest version, or `name@version` to that exact version.
    pub fn resolve(&self, request: &str) -> Result<ModelId, EngineError> {
        let (name, version) = split_request(request);
        let versions = self
            .by_name
            .get(name)
            .ok_or_else(|| EngineError::ModelNotFound(name.to_string()))?;
        match version {
            None => versions
                .last()
                .map(|(_, id)| *id)
                .ok_or_else(|| EngineError::ModelNotFound(name.to_string())),
            Some(text) => {
                let version: u32 = text
                    .parse()
                    .map_err(|_| EngineError::ModelNotFound(request.to_string()))?;
                versions
                    .iter()
                    .find(|(v, _)| *v == version)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| EngineError::VersionNotFound {
                        name: name.to_string(),
                        version,
                    })
            }
        }
    }

    /// Resolves several requests, keeping their order.
    pub fn select_models<S: AsRef<str>>(&self, requests: &[S]) -> Result<Vec<ModelId>, EngineError> {
        requests.iter().map(|r| self.resolve(r.as_ref())).collect()
    }

    fn entry(&self, id: ModelId) -> Result<&RegistryEntry, EngineError> {
        self.entries
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown model id {:?}", id)))
    }

    fn entry_mut(&mut self, id: ModelId) -> Result<&mut RegistryEntry, EngineError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown model id {:?}", id)))
    }

    pub fn catalog_entry(&self, id: ModelId) -> Option<&CatalogEntry> {
        self.entries.get(id).map(|e| &e.catalog)
    }

    /// `name@version` of a catalogued model.
    pub fn label(&self, id: ModelId) -> String {
        self.catalog_entry(id)
            .map(|c| format!("{}@{}", c.name, c.version))
            .unwrap_or_else(|| format!("{:?}", id))
    }

    pub fn is_loaded(&self, id: ModelId) -> bool {
        matches!(
            self.entries.get(id).map(|e| &e.state),
            Some(LoadState::Loaded(_))
        )
    }

    /// The kind of a loaded model; `None` until it has been loaded.
    pub fn kind(&self, id: ModelId) -> Option<ModelKind> {
        match &self.entries.get(id)?.state {
            LoadState::Loaded(LoadedModel::Direct(_)) => Some(ModelKind::Direct),
            LoadState::Loaded(LoadedModel::Meta(_)) => Some(ModelKind::Meta),
            _ => None,
        }
    }

    /// Descriptive metadata of a loaded model.
    pub fn metadata(&self, id: ModelId) -> Option<&Metadata> {
        match &self.entries.get(id)?.state {
            LoadState::Loaded(LoadedModel::Direct(d)) => Some(&d.settings.metadata),
            LoadState::Loaded(LoadedModel::Meta(m)) => Some(&m.definition.metadata),
            _ => None,
        }
    }

    pub fn structure_flag(&self, id: ModelId) -> Option<StructureFlag> {
        self.metadata(id).map(|m| m.structure_flag)
    }

    /// Meta-models that declared `id` as a dependency.
    pub fn super_models(&self, id: ModelId) -> &[ModelId] {
        self.entries
            .get(id)
            .map(|e| e.super_models.as_slice())
            .unwrap_or_default()
    }

    /// Dependencies of a loaded meta-model: solutes, then components, then solvents.
    pub fn dependencies(&self, id: ModelId) -> Vec<ModelId> {
        match self.entries.get(id).map(|e| &e.state) {
            Some(LoadState::Loaded(LoadedModel::Meta(meta))) => meta.dependency_ids().collect(),
            _ => Vec::new(),
        }
    }

    pub fn cached(&self, id: ModelId, canonical_id: &str) -> Option<&QsarResult> {
        self.entries.get(id)?.cache.get(canonical_id)
    }

    /// Reads and links the definition of `id`. Does nothing once the model is loaded.
    ///
    /// # Errors
    ///
    /// Any [`DefinitionError`] of the model or of a dependency. A dependency that leads back
    /// to a model still being loaded is a [`DefinitionError::DependencyCycle`]. A failed
    /// model stays unloaded.
    #[instrument(skip_all, name = "load_model")]
    pub fn load(&mut self, id: ModelId) -> Result<(), EngineError> {
        let entry = self.entry(id)?;
        match &entry.state {
            LoadState::Loaded(_) => return Ok(()),
            LoadState::Loading => {
                return Err(DefinitionError::DependencyCycle(entry.catalog.name.clone()).into());
            }
            LoadState::Unloaded => {}
        }
        let spec = self.source.load(&entry.catalog)?;
        self.entry_mut(id)?.state = LoadState::Loading;

        match self.link(id, spec) {
            Ok((model, cache)) => {
                let entry = self.entry_mut(id)?;
                entry.state = LoadState::Loaded(model);
                entry.cache = cache;
                info!(model = %self.label(id), "Loaded model");
                Ok(())
            }
            Err(e) => {
                self.entry_mut(id)?.state = LoadState::Unloaded;
                Err(e)
            }
        }
    }

    fn link(&mut self, id: ModelId, spec: ModelSpec) -> Result<(LoadedModel, ResultCache), EngineError> {
        match spec {
            ModelSpec::Direct(definition) => {
                let cache = ResultCache::with_defaults(&definition.stored);
                Ok((LoadedModel::Direct(definition), cache))
            }
            ModelSpec::Meta(definition) => {
                let combiner = self.combiner(&definition.combiner).ok_or_else(|| {
                    DefinitionError::UnknownCombiner {
                        model: definition.name.clone(),
                        combiner: definition.combiner.clone(),
                    }
                })?;
                let solutes = self.link_dependencies(&definition.name, &definition.dependencies.solute)?;
                let components =
                    self.link_dependencies(&definition.name, &definition.dependencies.component)?;
                let solvents = self.link_dependencies(&definition.name, &definition.dependencies.solvent)?;

                let cache = ResultCache::with_defaults(&definition.stored);
                let meta = MetaModel {
                    definition,
                    combiner,
                    solutes,
                    components,
                    solvents,
                };
                for dependency in meta.dependency_ids() {
                    let entry = self.entry_mut(dependency)?;
                    if !entry.super_models.contains(&id) {
                        entry.super_models.push(id);
                    }
                }
                Ok((LoadedModel::Meta(Arc::new(meta)), cache))
            }
        }
    }

    fn link_dependencies(
        &mut self,
        model: &str,
        requests: &[String],
    ) -> Result<Vec<(String, ModelId)>, EngineError> {
        let mut linked = Vec::with_capacity(requests.len());
        for request in requests {
            let dependency = self
                .resolve(request)
                .map_err(|_| DefinitionError::UnknownDependency {
                    model: model.to_string(),
                    dependency: request.clone(),
                })?;
            self.load(dependency)?;
            let (name, _) = split_request(request);
            linked.push((name.to_string(), dependency));
        }
        Ok(linked)
    }

    /// Applies model `id` to the given chemicals.
    ///
    /// # Arguments
    ///
    /// * `matcher` - Structure service that produced the handles.
    /// * `solutes`, `solvents`, `components` - Parsed chemicals in each role.
    ///
    /// # Return
    ///
    /// The model's result. Unacceptable inputs (wrong mixture arity, structures the
    /// matcher cannot describe, a dependency without a value) come back as a result with
    /// no value and an explanatory note.
    ///
    /// # Errors
    ///
    /// Definition, interpreter and combination failures, which point at a broken model
    /// rather than a bad input.
    #[instrument(skip_all, name = "apply_model")]
    pub fn apply_model<M: StructureMatcher>(
        &mut self,
        id: ModelId,
        matcher: &M,
        solutes: &[M::Handle],
        solvents: &[M::Handle],
        components: &[M::Handle],
    ) -> Result<QsarResult, EngineError> {
        self.load(id)?;
        match self.kind(id) {
            Some(ModelKind::Direct) => self.apply_direct(id, matcher, solutes, solvents, components),
            Some(ModelKind::Meta) => self.apply_meta(id, matcher, solutes, solvents, components),
            None => Err(EngineError::Internal(format!(
                "model {} is not loaded after load()",
                self.label(id)
            ))),
        }
    }

    fn apply_direct<M: StructureMatcher>(
        &mut self,
        id: ModelId,
        matcher: &M,
        solutes: &[M::Handle],
        solvents: &[M::Handle],
        components: &[M::Handle],
    ) -> Result<QsarResult, EngineError> {
        let entry = self.entry(id)?;
        let LoadState::Loaded(LoadedModel::Direct(definition)) = &entry.state else {
            return Err(EngineError::Internal("expected a direct model".to_string()));
        };
        let metadata = &definition.settings.metadata;

        let single = solutes.len() == 1 && solvents.is_empty() && components.is_empty();
        let Some(handle) = solutes.first().filter(|_| single) else {
            return Ok(input_error(metadata, definition.inputs.mismatch_note()));
        };

        let canonical = matcher.canonical_id(handle);
        if let Some(hit) = entry.cache.get(&canonical) {
            debug!(model = %definition.name, id = %canonical, "Cache hit");
            return Ok(hit.clone());
        }
        debug!(model = %definition.name, id = %canonical, "Cache miss");

        let result = match evaluate_direct(matcher, handle, definition) {
            Ok(result) => result,
            Err(EngineError::Structure { source }) if !matches!(source, StructureError::Pattern(_)) => {
                return Ok(input_error(metadata, &format!("structure error: {}", source)));
            }
            Err(e) => return Err(e),
        };
        self.entry_mut(id)?.cache.insert(&canonical, result.clone());
        Ok(result)
    }

    fn apply_meta<M: StructureMatcher>(
        &mut self,
        id: ModelId,
        matcher: &M,
        solutes: &[M::Handle],
        solvents: &[M::Handle],
        components: &[M::Handle],
    ) -> Result<QsarResult, EngineError> {
        let meta = match &self.entry(id)?.state {
            LoadState::Loaded(LoadedModel::Meta(meta)) => Arc::clone(meta),
            _ => return Err(EngineError::Internal("expected a meta model".to_string())),
        };
        let definition = &meta.definition;
        let metadata = &definition.metadata;
        let inputs = definition.inputs;

        if !inputs.accepts(solutes.len(), solvents.len(), components.len()) {
            return Ok(input_error(metadata, inputs.mismatch_note()));
        }

        let cache_key = if inputs.total_max == 1 {
            solutes
                .iter()
                .chain(components)
                .chain(solvents)
                .next()
                .map(|h| matcher.canonical_id(h))
        } else {
            None
        };
        if let Some(key) = &cache_key {
            if let Some(hit) = self.entry(id)?.cache.get(key) {
                debug!(model = %definition.name, id = %key, "Cache hit");
                return Ok(hit.clone());
            }
        }

        let mut notes = Vec::new();
        let mut by_role = Vec::with_capacity(3);
        for (role, chemicals, dependencies) in [
            (Role::Solute, solutes, &meta.solutes),
            (Role::Component, components, &meta.components),
            (Role::Solvent, solvents, &meta.solvents),
        ] {
            let mut role_results = Vec::with_capacity(chemicals.len());
            for (index, chemical) in chemicals.iter().enumerate() {
                let mut results = DependencyResults::new();
                for (name, dependency) in dependencies {
                    let result =
                        self.apply_model(*dependency, matcher, std::slice::from_ref(chemical), &[], &[])?;
                    if !result.has_value() {
                        warn!(
                            model = %definition.name,
                            dependency = %name,
                            note = %result.note,
                            "Dependency returned no value"
                        );
                        return Ok(input_error(
                            metadata,
                            &format!("dependency {} failed: {}", name, result.note),
                        ));
                    }
                    results.push(name, result);
                }
                let summary = results.level_summary();
                if !summary.is_empty() {
                    notes.push(format!(
                        "{} {} dependency ULs: {}",
                        role.label(),
                        index + 1,
                        summary.join(", ")
                    ));
                }
                role_results.push(results);
            }
            by_role.push(role_results);
        }
        let [solute_results, component_results, solvent_results]: [Vec<DependencyResults>; 3] = by_role
            .try_into()
            .map_err(|_| EngineError::Internal("dependency roles out of step".to_string()))?;

        let propagated = notes.join("; ");
        let combine_inputs = CombineInputs {
            solutes: &solute_results,
            solvents: &solvent_results,
            components: &component_results,
            propagated_notes: &propagated,
        };
        let result = (meta.combiner)(&combine_inputs)?
            .with_metadata(&metadata.citation, &metadata.units, &metadata.endpoint)
            .rounded(metadata.round_digits);

        if let Some(key) = cache_key {
            self.entry_mut(id)?.cache.insert(&key, result.clone());
        }
        Ok(result)
    }

    /// Stores a user or experimental value for one structure, loading the model if needed.
    ///
    /// Mixture meta-models (more than one chemical in total) cannot hold stored values;
    /// the call is ignored with a warning.
    pub fn set_stored(
        &mut self,
        id: ModelId,
        canonical_id: &str,
        value: StoredValue,
    ) -> Result<(), EngineError> {
        self.load(id)?;
        let label = self.label(id);
        let entry = self.entry_mut(id)?;
        let (metadata, mixture) = match &entry.state {
            LoadState::Loaded(LoadedModel::Direct(d)) => (&d.settings.metadata, false),
            LoadState::Loaded(LoadedModel::Meta(m)) => {
                (&m.definition.metadata, m.definition.inputs.total_max > 1)
            }
            _ => return Err(EngineError::Internal("model not loaded".to_string())),
        };
        if mixture {
            warn!(model = %label, "Stored values are not supported for mixture models");
            return Ok(());
        }

        let level: UncertaintyLevel = value.level.parse()?;
        let result = QsarResult {
            prediction: value.value,
            uncertainty_level: Some(level),
            error: value.error,
            note: value.note,
            citation: value.citation,
            units: metadata.units.clone(),
            endpoint: metadata.endpoint.clone(),
        };
        entry.cache.insert(canonical_id, result);
        debug!(model = %label, id = %canonical_id, %level, "Stored value");
        Ok(())
    }

    fn propagate<F>(&mut self, id: ModelId, propagation: Propagation, op: &F) -> Result<(), EngineError>
    where
        F: Fn(&mut ResultCache),
    {
        self.load(id)?;
        op(&mut self.entry_mut(id)?.cache);
        if propagation.down {
            for dependency in self.dependencies(id) {
                self.propagate(dependency, Propagation::DOWN, op)?;
            }
        }
        if propagation.up {
            for dependent in self.super_models(id).to_vec() {
                self.propagate(dependent, Propagation::UP, op)?;
            }
        }
        Ok(())
    }

    /// Puts back the load-time entry for `canonical_id`, if there was one.
    pub fn load_stored(
        &mut self,
        id: ModelId,
        canonical_id: &str,
        propagation: Propagation,
    ) -> Result<(), EngineError> {
        self.propagate(id, propagation, &|cache: &mut ResultCache| {
            cache.load_default(canonical_id);
        })
    }

    pub fn remove_stored(
        &mut self,
        id: ModelId,
        canonical_id: &str,
        propagation: Propagation,
    ) -> Result<(), EngineError> {
        self.propagate(id, propagation, &|cache: &mut ResultCache| {
            cache.remove(canonical_id);
        })
    }

    /// Replaces the cache with the load-time entries.
    pub fn reset_stored(&mut self, id: ModelId, propagation: Propagation) -> Result<(), EngineError> {
        self.propagate(id, propagation, &ResultCache::reset)
    }

    /// Merges the load-time entries back in, keeping everything else.
    pub fn restore_stored(&mut self, id: ModelId, propagation: Propagation) -> Result<(), EngineError> {
        self.propagate(id, propagation, &ResultCache::restore)
    }

    pub fn erase_user_stored(&mut self, id: ModelId, propagation: Propagation) -> Result<(), EngineError> {
        self.propagate(id, propagation, &ResultCache::erase_user)
    }

    pub fn erase_experimental_stored(
        &mut self,
        id: ModelId,
        propagation: Propagation,
    ) -> Result<(), EngineError> {
        self.propagate(id, propagation, &ResultCache::erase_experimental)
    }

    pub fn erase_all_stored(&mut self, id: ModelId, propagation: Propagation) -> Result<(), EngineError> {
        self.propagate(id, propagation, &ResultCache::erase_all)
    }
}

fn input_error(metadata: &Metadata, note: &str) -> QsarResult {
    QsarResult::failure(note).with_metadata(&metadata.citation, &metadata.units, &metadata.endpoint)
}

/// Featurizes, runs the program and classifies one structure under a direct model.
fn evaluate_direct<M: StructureMatcher>(
    matcher: &M,
    handle: &M::Handle,
    definition: &ModelDefinition,
) -> Result<QsarResult, EngineError> {
    let features = featurize(matcher, handle, definition)?;
    let ctx = EvaluationContext::new(definition, &features.counts, &features.violations);
    let output = Interpreter::new(ctx).run()?;

    let result = match (&definition.domain, definition.settings.apply_domain) {
        (Some(config), true) => {
            let assessment = domain::classify(
                definition,
                config,
                &features.counts,
                output.prediction,
                &features.violations,
            )?;
            QsarResult {
                prediction: Some(assessment.prediction),
                uncertainty_level: Some(UncertaintyLevel::new(assessment.level)),
                error: Some(assessment.error),
                note: assessment.note,
                ..QsarResult::default()
            }
        }
        (None, true) => QsarResult {
            prediction: Some(output.prediction),
            uncertainty_level: output.level.map(UncertaintyLevel::new),
            error: output.error,
            note: output.note.unwrap_or_default(),
            ..QsarResult::default()
        },
        (_, false) => QsarResult {
            prediction: Some(output.prediction),
            error: output.error,
            ..QsarResult::default()
        },
    };

    let metadata = &definition.settings.metadata;
    Ok(result
        .with_metadata(&metadata.citation, &metadata.units, &metadata.endpoint)
        .rounded(metadata.round_digits))
}
