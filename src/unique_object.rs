//! Collapses duplicate candidates that different reconstruction branches produced for the same
//! physical object (e.g. a photon also reconstructed as an electron).

use crate::candidate::CandidateId;
use crate::config::ModuleConfig;
use crate::error::{Error, Result};
use crate::event::EventStore;
use crate::module::Module;
use crate::rng::StreamRng;

/// Processes a priority-ordered list of `(input, output)` collection pairs: a candidate is copied
/// to its output collection unless it overlaps (shares a leaf constituent with) a candidate
/// already emitted by a higher-priority pair in the same event.
pub struct UniqueObjectFinder {
    pairs: Vec<(String, String)>,
}

impl Default for UniqueObjectFinder {
    fn default() -> Self {
        Self { pairs: Vec::new() }
    }
}

impl UniqueObjectFinder {
    /// Creates a unique-object finder with no configuration bound yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn init_impl(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        let flat = config.required_str_array("InputArray")?;
        if flat.len() % 2 != 0 {
            return Err(Error::Configuration {
                module: config.name.clone(),
                message: "`InputArray` must list an even number of entries (input, output pairs)".to_string(),
            });
        }

        self.pairs = flat.chunks(2).map(|pair| (pair[0].clone(), pair[1].clone())).collect();
        for (input, output) in &self.pairs {
            let _ = store.resolve(&config.name, input)?;
            store.declare(output);
        }
        Ok(())
    }

    fn process_impl(&mut self, store: &mut EventStore, _rng: &mut StreamRng) {
        let mut emitted: Vec<CandidateId> = Vec::new();

        for (input, output) in &self.pairs {
            let candidates: Vec<CandidateId> = store.get(input).unwrap_or(&[]).to_vec();
            let mut kept = Vec::new();
            for id in candidates {
                let is_unique = !emitted.iter().any(|&other| store.factory().overlaps(id, other));
                if is_unique {
                    kept.push(id);
                }
            }
            emitted.extend(&kept);
            store.set(output, kept);
        }
    }
}

impl Module for UniqueObjectFinder {
    fn init(&mut self, config: &ModuleConfig, store: &mut EventStore) -> Result<()> {
        self.init_impl(config, store)
    }

    fn process(&mut self, store: &mut EventStore, rng: &mut StreamRng) {
        self.process_impl(store, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamValue;

    #[test]
    fn photon_sharing_a_cluster_with_an_electron_is_dropped() {
        let mut store = EventStore::new();
        store.declare("electrons");
        store.declare("photons");

        let cluster = store.factory_mut().new_candidate();
        let electron = store.factory_mut().new_candidate();
        store.factory_mut().get_mut(electron).add_child(cluster);
        store.push("electrons", electron);

        let photon = store.factory_mut().new_candidate();
        store.factory_mut().get_mut(photon).add_child(cluster);
        store.push("photons", photon);

        let mut module = UniqueObjectFinder::new();
        let config = ModuleConfig::new("unique").with(
            "InputArray",
            ParamValue::Array(vec![
                ParamValue::String("electrons".into()),
                ParamValue::String("unique_electrons".into()),
                ParamValue::String("photons".into()),
                ParamValue::String("unique_photons".into()),
            ]),
        );
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        assert_eq!(store.get("unique_electrons").unwrap(), &[electron]);
        assert!(store.get("unique_photons").unwrap().is_empty());
    }

    #[test]
    fn disjoint_candidates_both_survive() {
        let mut store = EventStore::new();
        store.declare("electrons");
        store.declare("jets");

        let electron = store.factory_mut().new_candidate();
        store.push("electrons", electron);
        let jet = store.factory_mut().new_candidate();
        store.push("jets", jet);

        let mut module = UniqueObjectFinder::new();
        let config = ModuleConfig::new("unique").with(
            "InputArray",
            ParamValue::Array(vec![
                ParamValue::String("electrons".into()),
                ParamValue::String("unique_electrons".into()),
                ParamValue::String("jets".into()),
                ParamValue::String("unique_jets".into()),
            ]),
        );
        module.init(&config, &mut store).unwrap();
        let mut rng = StreamRng::for_event(0, 0);
        module.process(&mut store, &mut rng);

        assert_eq!(store.get("unique_electrons").unwrap(), &[electron]);
        assert_eq!(store.get("unique_jets").unwrap(), &[jet]);
    }
}
