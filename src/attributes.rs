//! Fixed-width attribute arrays and base-unit index tables.

use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};

use crate::metadata::{StaticFile, StaticMetadata};

/// A decoded little-endian numeric array.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl AttributeData {
    /// Decode `bytes` using the element width and signedness `file` declares.
    pub fn decode(file: &StaticFile, bytes: &[u8]) -> Result<Self> {
        let width = file.bytes_per_element as usize;
        ensure!(matches!(width, 1 | 2 | 4), "[attributes] {}: unsupported element width {width}", file.file_name);
        ensure!(
            bytes.len() % width == 0,
            "[attributes] {}: length {} is not a multiple of {width}",
            file.file_name,
            bytes.len()
        );

        Ok(match (width, file.unsigned) {
            (1, true) => Self::U8(bytes.to_vec()),
            (1, false) => Self::I8(bytes.iter().map(|&b| b as i8).collect()),
            (2, true) => Self::U16(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()),
            (2, false) => Self::I16(bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect()),
            (_, true) => Self::U32(bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()),
            (_, false) => Self::I32(bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
        }
    }

    #[inline] pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Element `i` widened to `i64`.
    pub fn get(&self, i: usize) -> Option<i64> {
        match self {
            Self::U8(v) => v.get(i).map(|&x| x as i64),
            Self::U16(v) => v.get(i).map(|&x| x as i64),
            Self::U32(v) => v.get(i).map(|&x| x as i64),
            Self::I8(v) => v.get(i).map(|&x| x as i64),
            Self::I16(v) => v.get(i).map(|&x| x as i64),
            Self::I32(v) => v.get(i).map(|&x| x as i64),
        }
    }

    /// Sum of the elements at `indices`; indices past the end contribute nothing.
    pub fn sum(&self, indices: &[u32]) -> i64 {
        indices.iter().filter_map(|&i| self.get(i as usize)).sum()
    }
}

// ---------------------------------------------------------------------------
// Base-unit index
// ---------------------------------------------------------------------------

/// Inverted index from a unit at some level to the base units it contains.
#[derive(Clone, Debug, Default, PartialEq)]
struct Csr {
    indptr: Vec<u32>,
    indices: Vec<u32>,
}

impl Csr {
    fn from_parents(level: &str, parents: &AttributeData) -> Result<Self> {
        let mut units = Vec::with_capacity(parents.len());
        for base in 0..parents.len() {
            let unit = parents.get(base).unwrap_or_default();
            ensure!(unit >= 0, "[attributes] {level}: base unit {base} has negative parent {unit}");
            units.push(unit as u32);
        }

        let num_units = units.iter().max().map_or(0, |&m| m as usize + 1);
        let mut indptr = vec![0u32; num_units + 1];
        for &unit in &units {
            indptr[unit as usize + 1] += 1;
        }
        for i in 0..num_units {
            indptr[i + 1] += indptr[i];
        }

        let mut next = indptr.clone();
        let mut indices = vec![0u32; units.len()];
        for (base, &unit) in units.iter().enumerate() {
            indices[next[unit as usize] as usize] = base as u32;
            next[unit as usize] += 1;
        }

        Ok(Self { indptr, indices })
    }

    fn row(&self, unit: u32) -> &[u32] {
        let unit = unit as usize;
        if unit + 1 >= self.indptr.len() { return &[] }
        &self.indices[self.indptr[unit] as usize..self.indptr[unit + 1] as usize]
    }
}

/// Per-level tables expanding unit indices to base-unit indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaseIndex {
    /// Coarse to fine; the finest level has no table since its units are
    /// the base units.
    levels: Vec<Csr>,
    num_base: usize,
}

impl BaseIndex {
    /// Build from geo-level arrays ordered coarsest to finest.  Each array
    /// maps every base unit to its containing unit at that level.
    pub fn build(levels: &[(&str, &AttributeData)]) -> Result<Self> {
        let Some((_, finest)) = levels.last() else { bail!("[attributes] no geo levels") };
        let num_base = finest.len();
        for (name, parents) in levels {
            ensure!(
                parents.len() == num_base,
                "[attributes] geo level {name} has {} entries, expected {num_base}",
                parents.len()
            );
        }

        let tables = levels[..levels.len() - 1].iter()
            .map(|(name, parents)| Csr::from_parents(name, parents))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { levels: tables, num_base })
    }

    /// Number of base units.
    #[inline] pub fn num_base(&self) -> usize { self.num_base }

    /// Append the base units contained in `units` at `depth` to `out`.
    pub fn expand(&self, depth: usize, units: impl IntoIterator<Item = u32>, out: &mut Vec<u32>) {
        match self.levels.get(depth) {
            Some(table) => units.into_iter().for_each(|unit| out.extend_from_slice(table.row(unit))),
            None => out.extend(units.into_iter().filter(|&unit| (unit as usize) < self.num_base)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One named attribute array.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeTable {
    pub id: Arc<str>,
    pub data: AttributeData,
}

/// Named totals in declaration order.
pub type Totals = Vec<(Arc<str>, i64)>;

/// Every attribute array of a region plus its base-unit index.  Read-only
/// once loaded and shared between workers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeTables {
    pub demographics: Vec<AttributeTable>,
    /// Present only when the region declares voting files.
    pub voting: Option<Vec<AttributeTable>>,
    pub base_index: BaseIndex,
}

impl AttributeTables {
    /// Load every static file named by `metadata` through `fetch`.
    pub fn load(metadata: &StaticMetadata, mut fetch: impl FnMut(&StaticFile) -> Result<Arc<[u8]>>) -> Result<Self> {
        let mut load_table = |file: &StaticFile| -> Result<AttributeTable> {
            let bytes = fetch(file)
                .with_context(|| format!("[attributes] Failed to fetch {}", file.file_name))?;
            Ok(AttributeTable { id: Arc::from(file.id.as_str()), data: AttributeData::decode(file, &bytes)? })
        };

        let demographics = metadata.demographics.iter().map(&mut load_table).collect::<Result<Vec<_>>>()?;
        let voting = match &metadata.voting {
            Some(files) => Some(files.iter().map(&mut load_table).collect::<Result<Vec<_>>>()?),
            None => None,
        };

        // geoLevels follow the hierarchy, finest first.
        let geo_levels = metadata.geo_levels.iter().rev().map(&mut load_table).collect::<Result<Vec<_>>>()?;
        let named: Vec<(&str, &AttributeData)> = geo_levels.iter()
            .map(|table| (table.id.as_ref(), &table.data))
            .collect();
        let base_index = BaseIndex::build(&named)?;

        Ok(Self { demographics, voting, base_index })
    }

    /// Demographic and voting totals over `base_units`.
    pub fn totals(&self, base_units: &[u32]) -> (Totals, Option<Totals>) {
        let sum = |tables: &[AttributeTable]| -> Totals {
            tables.iter().map(|table| (table.id.clone(), table.data.sum(base_units))).collect()
        };
        (sum(&self.demographics), self.voting.as_deref().map(sum))
    }

    /// Rough resident size in bytes.
    pub fn approx_bytes(&self) -> usize {
        let width = |data: &AttributeData| match data {
            AttributeData::U8(_) | AttributeData::I8(_) => 1,
            AttributeData::U16(_) | AttributeData::I16(_) => 2,
            AttributeData::U32(_) | AttributeData::I32(_) => 4,
        };
        let arrays: usize = self.demographics.iter()
            .chain(self.voting.iter().flatten())
            .map(|table| table.data.len() * width(&table.data))
            .sum();
        let index: usize = self.base_index.levels.iter()
            .map(|csr| (csr.indptr.len() + csr.indices.len()) * 4)
            .sum();
        arrays + index
    }
}
