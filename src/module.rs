//! The module trait and the closed-set enum that dispatches over concrete modules.

use enum_dispatch::enum_dispatch;

use crate::calorimeter::Calorimeter;
use crate::config::ModuleConfig;
use crate::error::Result;
use crate::event::EventStore;
use crate::flavour::FlavourAssociation;
use crate::isolation::Isolation;
use crate::propagator::ParticlePropagator;
use crate::rng::StreamRng;
use crate::unique_object::UniqueObjectFinder;
use crate::vertex_finder::VertexFinderDa4D;

/// A single reconstruction step.
///
/// A module is initialized once per run (`init`, fallible: resolves its configuration and its
/// input collection names) and then invoked once per event (`process`, infallible: numerical
/// trouble is absorbed locally rather than surfaced). `init` runs sequentially in declaration
/// order so that a later module can resolve a collection an earlier module declares; `process`
/// runs in the same fixed order every event, each module reading only collections produced by
/// modules that precede it.
#[enum_dispatch]
pub trait Module {
    /// Resolves this module's configuration against `config`, validating required parameters and
    /// checking that every input collection name it needs either already exists in `store` or is
    /// one this module itself will declare.
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()>;

    /// Executes this module for the current event. Reads its configured input collections from
    /// `store`, writes its output collections back into `store`, drawing randomness (if any) from
    /// `rng`.
    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng);
}

/// Closed set of concrete module implementations the pipeline can sequence.
///
/// New variants are appended to the end of this list; pre-existing variants never change
/// position or meaning, since a pipeline's module order is part of a run's reproducibility
/// contract.
#[enum_dispatch(Module)]
pub enum ModuleEnum {
    /// Helical propagation through a uniform axial magnetic field.
    ParticlePropagator,
    /// Segmented eta-phi calorimeter with tower accumulation and e-flow.
    Calorimeter,
    /// Deterministic-annealing primary-vertex finder in `(z, t)`.
    VertexFinderDa4D,
    /// Isolation-cone sum computation.
    Isolation,
    /// Parton-flavour association by proximity/inclusion.
    FlavourAssociation,
    /// Collapses duplicate candidates referring to the same physical object.
    UniqueObjectFinder,
}

/// A fixed, ordered sequence of modules executed once per event.
pub struct Pipeline {
    modules: Vec<(String, ModuleEnum)>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    /// Appends `module` under instance name `name`, initializing it against `config` and `store`
    /// immediately. Returns the first configuration error encountered, attributing it to `name`.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        mut module: ModuleEnum,
        config: &ModuleConfig,
        store: &mut EventStore,
    ) -> Result<()> {
        module.init(config, store)?;
        self.modules.push((name.into(), module));
        Ok(())
    }

    /// Runs every module in declaration order against the current event in `store`.
    pub fn process_event(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        for (_, module) in &mut self.modules {
            module.process(store, rng);
        }
    }

    /// Instance names in declaration order, for diagnostics.
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
