//! Integer encoding of the source table.
//!
//! Every quasi-identifier gets a dictionary of generalized values (shared by
//! all levels, so equal strings get equal codes), the leaf index of every
//! row and a `[level][leaf] -> code` table. Sensitive attributes are encoded
//! as one code per row. Per-cell loss figures used by the metrics are
//! precomputed here, once per call.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::data::{AttributeType, Data, DataSubset, Hierarchy};
use crate::error::{ConfigError, DataError, Result};

/// Encoded quasi-identifier.
#[derive(Debug, Clone)]
pub(crate) struct QuasiIdentifier {
    pub(crate) name: String,
    pub(crate) column: usize,
    dictionary: Vec<String>,
    leaf_of_row: Vec<u32>,
    codes: Vec<Vec<u32>>,
    generalization_loss: Vec<Vec<f64>>,
    generalized_log_frequency: Vec<Vec<f64>>,
    leaf_log_frequency_sum: f64,
}

impl QuasiIdentifier {
    /// Number of levels (hierarchy width).
    pub(crate) fn height(&self) -> usize {
        self.codes.len()
    }

    pub(crate) fn max_level(&self) -> u32 {
        u32::try_from(self.height().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    pub(crate) fn leaf(&self, row: usize) -> usize {
        self.leaf_of_row[row] as usize
    }

    /// Code of `row` generalized at `level`.
    pub(crate) fn code(&self, row: usize, level: u32) -> u32 {
        self.codes[level as usize][self.leaf(row)]
    }

    pub(crate) fn value(&self, code: u32) -> &str {
        &self.dictionary[code as usize]
    }

    /// Generalization loss of a cell: `(leaves under g - 1) / (leaves - 1)`.
    pub(crate) fn generalization_loss(&self, row: usize, level: u32) -> f64 {
        self.generalization_loss[level as usize][self.leaf(row)]
    }

    /// `log2 f(g)`, where `f(g)` counts the released records generalized
    /// to the same value as `row` at `level`.
    pub(crate) fn generalized_log_frequency(&self, row: usize, level: u32) -> f64 {
        self.generalized_log_frequency[level as usize][self.leaf(row)]
    }

    /// `Σ log2 f(x)` over the released records, `f(x)` being the frequency
    /// of the record's raw value.
    pub(crate) const fn leaf_log_frequency_sum(&self) -> f64 {
        self.leaf_log_frequency_sum
    }
}

/// Tree over the values of a sensitive attribute, used by hierarchical
/// t-closeness. `node_at[level][code]` is the id of the ancestor of value
/// `code` at `level`; ids are dense per level.
#[derive(Debug, Clone)]
pub(crate) struct SensitiveTree {
    pub(crate) node_at: Vec<Vec<u32>>,
    pub(crate) nodes_per_level: Vec<usize>,
}

impl SensitiveTree {
    /// Highest level of the tree.
    pub(crate) fn height(&self) -> usize {
        self.node_at.len().saturating_sub(1)
    }
}

/// Encoded sensitive attribute.
#[derive(Debug, Clone)]
pub(crate) struct SensitiveAttribute {
    pub(crate) name: String,
    pub(crate) column: usize,
    dictionary: Vec<String>,
    codes: Vec<u32>,
    pub(crate) tree: Option<SensitiveTree>,
}

impl SensitiveAttribute {
    pub(crate) fn code(&self, row: usize) -> u32 {
        self.codes[row]
    }

    pub(crate) fn distinct_values(&self) -> usize {
        self.dictionary.len()
    }
}

/// Encoded view of a [`Data`] object for one `anonymize()` call.
#[derive(Debug)]
pub(crate) struct DataManager {
    header: Vec<String>,
    rows: Arc<Vec<Vec<String>>>,
    kinds: Vec<AttributeType>,
    qis: Vec<QuasiIdentifier>,
    sensitive: Vec<SensitiveAttribute>,
    release: Option<Vec<bool>>,
    release_size: usize,
    fingerprint: u64,
}

impl DataManager {
    /// Encodes `data`. `subset`, when present, is the release population.
    pub(crate) fn new(data: &Data, subset: Option<&DataSubset>) -> Result<Self> {
        data.check_definition()?;

        let num_rows = data.num_rows();
        if num_rows == 0 {
            return Err(DataError::EmptyDataset.into());
        }

        let release = subset.map(|s| s.to_mask(num_rows)).transpose()?;
        let release_size = release
            .as_ref()
            .map_or(num_rows, |mask| mask.iter().filter(|m| **m).count());
        if release_size == 0 {
            return Err(DataError::EmptyDataset.into());
        }

        let rows = data.rows_arc();
        let definition = data.definition();
        let kinds: Vec<AttributeType> = data
            .header()
            .iter()
            .map(|name| definition.attribute_type(name))
            .collect();

        let mut qis = Vec::new();
        let mut sensitive = Vec::new();
        for (column, name) in data.header().iter().enumerate() {
            match kinds[column] {
                AttributeType::QuasiIdentifying => {
                    let hierarchy =
                        definition
                            .hierarchy(name)
                            .ok_or_else(|| ConfigError::DegenerateHierarchy {
                                attribute: name.clone(),
                                reason: "quasi-identifier without hierarchy".to_string(),
                            })?;
                    hierarchy.validate(name)?;
                    qis.push(encode_qi(
                        name,
                        column,
                        hierarchy,
                        &rows,
                        release.as_deref(),
                    )?);
                }
                AttributeType::Sensitive => {
                    let hierarchy = definition.hierarchy(name);
                    if let Some(h) = hierarchy {
                        h.validate(name)?;
                    }
                    sensitive.push(encode_sensitive(name, column, hierarchy, &rows)?);
                }
                _ => {}
            }
        }

        if qis.is_empty() {
            return Err(ConfigError::NoQuasiIdentifier.into());
        }

        let fingerprint = fingerprint(&qis, release.as_deref());

        Ok(Self {
            header: data.header().to_vec(),
            rows,
            kinds,
            qis,
            sensitive,
            release,
            release_size,
            fingerprint,
        })
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn header(&self) -> &[String] {
        &self.header
    }

    pub(crate) fn raw_value(&self, row: usize, column: usize) -> &str {
        &self.rows[row][column]
    }

    pub(crate) fn kind(&self, column: usize) -> AttributeType {
        self.kinds[column]
    }

    pub(crate) fn qis(&self) -> &[QuasiIdentifier] {
        &self.qis
    }

    pub(crate) fn qi_index(&self, name: &str) -> Option<usize> {
        self.qis.iter().position(|q| q.name == name)
    }

    /// Number of generalization levels of every quasi-identifier.
    pub(crate) fn heights(&self) -> Vec<usize> {
        self.qis.iter().map(QuasiIdentifier::height).collect()
    }

    pub(crate) fn sensitive(&self) -> &[SensitiveAttribute] {
        &self.sensitive
    }

    pub(crate) fn sensitive_index(&self, name: &str) -> Option<usize> {
        self.sensitive.iter().position(|s| s.name == name)
    }

    /// `true` if `row` is part of the release population.
    pub(crate) fn in_release(&self, row: usize) -> bool {
        self.release.as_ref().map_or(true, |mask| mask[row])
    }

    pub(crate) fn has_subset(&self) -> bool {
        self.release.is_some()
    }

    pub(crate) fn release_size(&self) -> usize {
        self.release_size
    }

    /// Hash of the encoded content; a cache built for another fingerprint
    /// must not be reused.
    pub(crate) const fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Frequency of every sensitive code over the release population.
    pub(crate) fn release_distribution(&self, sensitive: usize) -> Vec<(u32, u32)> {
        let attribute = &self.sensitive[sensitive];
        let mut counts = vec![0_u32; attribute.distinct_values()];
        for row in 0..self.num_rows() {
            if self.in_release(row) {
                let code = attribute.code(row) as usize;
                counts[code] = counts[code].saturating_add(1);
            }
        }
        counts
            .into_iter()
            .enumerate()
            .filter(|(_, c)| *c > 0)
            .filter_map(|(code, c)| u32::try_from(code).ok().map(|code| (code, c)))
            .collect()
    }
}

fn encode_qi(
    name: &str,
    column: usize,
    hierarchy: &Hierarchy,
    rows: &[Vec<String>],
    release: Option<&[bool]>,
) -> Result<QuasiIdentifier> {
    let hrows = hierarchy.rows();
    let height = hierarchy.height();
    let leaves = hrows.len();

    // 1) dizionario condiviso dai livelli
    let mut dictionary: Vec<String> = Vec::new();
    let mut lookup: HashMap<&str, u32> = HashMap::new();
    let mut codes = vec![vec![0_u32; leaves]; height];
    for (leaf, hrow) in hrows.iter().enumerate() {
        for (level, value) in hrow.iter().enumerate() {
            let next = u32::try_from(dictionary.len()).unwrap_or(u32::MAX);
            let code = *lookup.entry(value.as_str()).or_insert_with(|| {
                dictionary.push(value.clone());
                next
            });
            codes[level][leaf] = code;
        }
    }

    // 2) foglia di ogni riga
    let leaf_index: HashMap<&str, u32> = hrows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| u32::try_from(i).ok().map(|i| (r[0].as_str(), i)))
        .collect();
    let mut leaf_of_row = Vec::with_capacity(rows.len());
    for (row, cells) in rows.iter().enumerate() {
        let value = &cells[column];
        let leaf = leaf_index
            .get(value.as_str())
            .ok_or_else(|| DataError::UnmappedValue {
                attribute: name.to_string(),
                value: value.clone(),
                row,
            })?;
        leaf_of_row.push(*leaf);
    }

    // 3) perdita di generalizzazione per cella
    let mut generalization_loss = vec![vec![0.0_f64; leaves]; height];
    for (level, level_codes) in codes.iter().enumerate() {
        let mut under: HashMap<u32, usize> = HashMap::new();
        for code in level_codes {
            *under.entry(*code).or_insert(0) += 1;
        }
        for (leaf, code) in level_codes.iter().enumerate() {
            generalization_loss[level][leaf] = if leaves > 1 {
                (under[code] - 1) as f64 / (leaves - 1) as f64
            } else {
                0.0
            };
        }
    }

    // 4) frequenze per l'entropia non uniforme (popolazione rilasciata)
    let mut leaf_freq = vec![0_usize; leaves];
    for (row, leaf) in leaf_of_row.iter().enumerate() {
        if release.map_or(true, |mask| mask[row]) {
            leaf_freq[*leaf as usize] += 1;
        }
    }
    let leaf_log_frequency_sum = leaf_freq
        .iter()
        .filter(|f| **f > 0)
        .map(|f| *f as f64 * (*f as f64).log2())
        .sum();
    let mut generalized_log_frequency = vec![vec![0.0_f64; leaves]; height];
    for (level, level_codes) in codes.iter().enumerate() {
        let mut gen_freq: HashMap<u32, usize> = HashMap::new();
        for (leaf, code) in level_codes.iter().enumerate() {
            *gen_freq.entry(*code).or_insert(0) += leaf_freq[leaf];
        }
        for (leaf, code) in level_codes.iter().enumerate() {
            let fg = gen_freq[code];
            if fg > 0 {
                generalized_log_frequency[level][leaf] = (fg as f64).log2();
            }
        }
    }

    Ok(QuasiIdentifier {
        name: name.to_string(),
        column,
        dictionary,
        leaf_of_row,
        codes,
        generalization_loss,
        generalized_log_frequency,
        leaf_log_frequency_sum,
    })
}

fn encode_sensitive(
    name: &str,
    column: usize,
    hierarchy: Option<&Hierarchy>,
    rows: &[Vec<String>],
) -> Result<SensitiveAttribute> {
    let mut dictionary: Vec<String> = Vec::new();
    let mut lookup: HashMap<String, u32> = HashMap::new();
    let mut codes = Vec::with_capacity(rows.len());
    for cells in rows {
        let value = &cells[column];
        let next = u32::try_from(dictionary.len()).unwrap_or(u32::MAX);
        let code = *lookup.entry(value.clone()).or_insert_with(|| {
            dictionary.push(value.clone());
            next
        });
        codes.push(code);
    }

    let tree = match hierarchy {
        Some(h) => Some(build_tree(name, h, &dictionary, &codes)?),
        None => None,
    };

    Ok(SensitiveAttribute {
        name: name.to_string(),
        column,
        dictionary,
        codes,
        tree,
    })
}

fn build_tree(
    name: &str,
    hierarchy: &Hierarchy,
    dictionary: &[String],
    codes: &[u32],
) -> Result<SensitiveTree> {
    let by_leaf: HashMap<&str, &Vec<String>> = hierarchy
        .rows()
        .iter()
        .map(|r| (r[0].as_str(), r))
        .collect();

    let height = hierarchy.height();
    let mut node_at = vec![vec![0_u32; dictionary.len()]; height];
    let mut nodes_per_level = vec![0_usize; height];
    for level in 0..height {
        let mut ids: HashMap<&str, u32> = HashMap::new();
        for (code, value) in dictionary.iter().enumerate() {
            let Some(hrow) = by_leaf.get(value.as_str()) else {
                let row = codes
                    .iter()
                    .position(|c| *c as usize == code)
                    .unwrap_or_default();
                return Err(DataError::UnmappedValue {
                    attribute: name.to_string(),
                    value: value.clone(),
                    row,
                }
                .into());
            };
            let next = u32::try_from(ids.len()).unwrap_or(u32::MAX);
            let id = *ids.entry(hrow[level].as_str()).or_insert(next);
            node_at[level][code] = id;
        }
        nodes_per_level[level] = ids.len();
    }

    Ok(SensitiveTree {
        node_at,
        nodes_per_level,
    })
}

fn fingerprint(qis: &[QuasiIdentifier], release: Option<&[bool]>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for qi in qis {
        qi.name.hash(&mut hasher);
        qi.leaf_of_row.hash(&mut hasher);
        qi.codes.hash(&mut hasher);
    }
    release.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> Data {
        let mut data = Data::from_rows(&[
            &["age", "zip"],
            &["34", "81667"],
            &["45", "81675"],
            &["66", "81925"],
        ])
        .expect("data");
        data.definition_mut().set_quasi_identifier(
            "zip",
            Hierarchy::from_rows(&[
                &["81667", "816**", "*"],
                &["81675", "816**", "*"],
                &["81925", "819**", "*"],
            ]),
        );
        data.definition_mut().set_sensitive("age");
        data
    }

    #[test]
    fn codes_follow_hierarchy() {
        let manager = DataManager::new(&data(), None).expect("manager");
        let zip = &manager.qis()[0];
        assert_eq!(zip.height(), 3);
        assert_eq!(zip.value(zip.code(0, 1)), "816**");
        assert_eq!(zip.code(0, 1), zip.code(1, 1));
        assert_ne!(zip.code(0, 1), zip.code(2, 1));
        assert_eq!(zip.code(0, 2), zip.code(2, 2));
    }

    #[test]
    fn generalization_loss_counts_leaves() {
        let manager = DataManager::new(&data(), None).expect("manager");
        let zip = &manager.qis()[0];
        assert!(zip.generalization_loss(0, 0).abs() < 1e-12);
        assert!((zip.generalization_loss(0, 1) - 0.5).abs() < 1e-12);
        assert!(zip.generalization_loss(2, 1).abs() < 1e-12);
        assert!((zip.generalization_loss(2, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unmapped_value_is_a_data_error() {
        let mut data = data();
        data.definition_mut()
            .set_quasi_identifier("zip", Hierarchy::from_rows(&[&["81667", "*"]]));
        let err = DataManager::new(&data, None).unwrap_err();
        assert!(err.to_string().contains("81675"));
    }

    #[test]
    fn missing_quasi_identifier_is_rejected() {
        let mut data = data();
        data.definition_mut().set_insensitive("zip");
        let err = DataManager::new(&data, None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::AnonymizerError::Config(ConfigError::NoQuasiIdentifier)
        ));
    }

    #[test]
    fn release_mask_restricts_distribution() {
        let subset = DataSubset::from_rows([0, 1]);
        let manager = DataManager::new(&data(), Some(&subset)).expect("manager");
        assert_eq!(manager.release_size(), 2);
        assert!(!manager.in_release(2));
        assert_eq!(manager.release_distribution(0), vec![(0, 1), (1, 1)]);
    }
}
