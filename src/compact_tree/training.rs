//! # Dictionary Retraining
//!
//! Once the tree has grown past `next_train_at` entries, the next commit
//! samples keys by random descent, trains a candidate dictionary and adopts
//! it when it compresses the sample better than the current tree
//! dictionary. Pages are not rewritten eagerly: each page switches to the
//! new dictionary the next time an insert finds it full.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::tree::{read_page, CompactTree};
use crate::config::TRAIN_SAMPLE_DIVISOR;
use crate::dictionary::DictionaryLookup;
use crate::storage::PageStore;

const MAX_SAMPLE_DEPTH: usize = 64;

impl<S: PageStore> CompactTree<'_, S> {
    /// Retrains the dictionary when due and persists the tree state.
    pub fn prepare_for_commit(&mut self) -> Result<()> {
        if self.state.number_of_entries >= self.state.next_train_at {
            self.retrain_dictionary()?;
            self.state.next_train_at = self
                .state
                .number_of_entries
                .saturating_mul(2)
                .max(self.config.train_threshold);
        }
        self.state.write_to(self.store.page_mut(self.header_page)?)
    }

    fn retrain_dictionary(&mut self) -> Result<()> {
        let wanted = (self.state.number_of_entries / TRAIN_SAMPLE_DIVISOR)
            .min(self.config.max_train_samples as u64) as usize;
        if wanted == 0 {
            return Ok(());
        }

        let arena = Bump::new();
        let mut samples = BumpVec::with_capacity_in(wanted, &arena);
        let mut rng = StdRng::seed_from_u64(self.state.number_of_entries ^ (u64::from(self.state.root_page) << 32));
        for _ in 0..wanted {
            if let Some(sample) = self.sample_key(&mut rng, &arena)? {
                samples.push(sample);
            }
        }
        if samples.is_empty() {
            return Ok(());
        }

        let current = self.dictionaries.dictionary(self.state.tree_dictionary_id)?;
        let candidate = self.dictionaries.registry().train(&samples)?;
        let current_bits: usize = samples.iter().map(|s| current.estimate_encoded_bits(s)).sum();
        let candidate_bits: usize = samples.iter().map(|s| candidate.estimate_encoded_bits(s)).sum();

        if candidate_bits < current_bits {
            info!(
                dictionary = %candidate.id(),
                previous = %current.id(),
                samples = samples.len(),
                current_bits,
                candidate_bits,
                "adopted retrained dictionary"
            );
            self.set_tree_dictionary(candidate.id());
        } else {
            debug!(
                dictionary = %candidate.id(),
                current_bits,
                candidate_bits,
                "retrained dictionary does not improve compression"
            );
        }
        Ok(())
    }

    /// Decodes one key reached by a uniformly random path from the root.
    fn sample_key<'b>(&self, rng: &mut StdRng, arena: &'b Bump) -> Result<Option<&'b [u8]>> {
        let mut page_no = self.state.root_page;
        for _ in 0..MAX_SAMPLE_DEPTH {
            let page = read_page(&*self.store, page_no)?;
            let count = page.entry_count();
            if count == 0 {
                return Ok(None);
            }
            let index = rng.gen_range(0..count);
            if page.is_branch() {
                page_no = page.child_at(index)?;
                continue;
            }

            let entry = page.entry(index)?;
            let dictionary = self.dictionaries.dictionary(page.dictionary_id())?;
            let out = arena.alloc_slice_fill_copy(dictionary.max_decoding_size(entry.key_bits), 0u8);
            let len = dictionary.decode(entry.key, entry.key_bits, out)?;
            let out: &'b [u8] = out;
            return Ok(Some(&out[..len]));
        }
        bail!("sampling descent exceeded {} levels", MAX_SAMPLE_DEPTH)
    }
}
