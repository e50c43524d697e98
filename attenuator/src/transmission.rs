//! Absorption lookup and Beer-Lambert transmission.
//!
//! Tables hold mass attenuation coefficients (cm^2/g) against photon energy
//! (eV) together with the material density (g/cm^3). Values between table
//! points are interpolated linearly in log-log space, which is how these
//! curves are normally tabulated. Nothing is extrapolated.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

const CM_PER_M: f64 = 100.0;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbsorptionTable {
    pub material: String,
    /// Density in g/cm^3.
    pub density: f64,
    /// `[photon energy (eV), mass attenuation coefficient (cm^2/g)]`, sorted
    /// by energy. An absorption edge is written as two points sharing one
    /// energy.
    pub points: Vec<[f64; 2]>,
}

impl AbsorptionTable {
    pub fn new(material: impl Into<String>, density: f64, points: Vec<[f64; 2]>) -> Result<Self> {
        let table = Self {
            material: material.into(),
            density,
            points,
        };
        table.validate()?;
        Ok(table)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidTable {
            material: self.material.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(self.invalid(format!("density must be positive, got {}", self.density)));
        }
        if self.points.len() < 2 {
            return Err(self.invalid("at least two points are required"));
        }
        for [energy, mu] in &self.points {
            if !(energy.is_finite() && *energy > 0.0) {
                return Err(self.invalid(format!("energy must be positive, got {energy}")));
            }
            if !(mu.is_finite() && *mu > 0.0) {
                return Err(self.invalid(format!("coefficient must be positive, got {mu}")));
            }
        }
        for pair in self.points.windows(2) {
            if pair[1][0] < pair[0][0] {
                return Err(self.invalid("energies must be sorted ascending"));
            }
        }
        let (min, max) = self.energy_range();
        if min == max {
            return Err(self.invalid("table covers a single energy"));
        }
        Ok(())
    }

    pub fn energy_range(&self) -> (f64, f64) {
        let first = self.points.first().map_or(f64::NAN, |p| p[0]);
        let last = self.points.last().map_or(f64::NAN, |p| p[0]);
        (first, last)
    }

    /// Mass attenuation coefficient at `energy`, in cm^2/g.
    pub fn attenuation_coefficient(&self, energy: f64) -> Result<f64> {
        let (min, max) = self.energy_range();
        // Written this way round so NaN is rejected too.
        if !(energy >= min && energy <= max) {
            return Err(Error::EnergyOutOfRange {
                material: self.material.clone(),
                energy,
                min,
                max,
            });
        }

        let hi = self.points.partition_point(|p| p[0] <= energy);
        if hi == self.points.len() {
            return Ok(self.points[hi - 1][1]);
        }

        let [e0, mu0] = self.points[hi - 1];
        if energy == e0 {
            return Ok(mu0);
        }
        let [e1, mu1] = self.points[hi];
        let fraction = (energy.ln() - e0.ln()) / (e1.ln() - e0.ln());
        Ok((mu0.ln() + fraction * (mu1.ln() - mu0.ln())).exp())
    }

    /// Transmitted fraction through `thickness` metres of this material.
    pub fn transmission(&self, thickness: f64, energy: f64) -> Result<f64> {
        let mu = self.attenuation_coefficient(energy)?;
        Ok((-mu * self.density * thickness * CM_PER_M).exp())
    }
}

/// Where absorption tables come from.
pub trait AbsorptionSource: Send + Sync {
    fn load(&self, material: &str) -> Result<AbsorptionTable>;
}

/// Reads `<dir>/<material>.toml`.
#[derive(Debug, Clone)]
pub struct TableDirectory {
    dir: PathBuf,
}

impl TableDirectory {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, material: &str) -> PathBuf {
        self.dir.join(format!("{material}.toml"))
    }
}

impl AbsorptionSource for TableDirectory {
    fn load(&self, material: &str) -> Result<AbsorptionTable> {
        // Keep symbols from escaping the table directory.
        if material.is_empty() || !material.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::UnknownMaterial {
                material: material.to_string(),
            });
        }

        let path = self.path_for(material);
        if !path.exists() {
            return Err(Error::UnknownMaterial {
                material: material.to_string(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|source| Error::TableIo {
            path: path.clone(),
            source,
        })?;
        let table: AbsorptionTable =
            toml::from_str(&content).map_err(|source| Error::TableParse {
                path: path.clone(),
                source,
            })?;

        if table.material != material {
            return Err(Error::InvalidTable {
                material: material.to_string(),
                reason: format!("{} declares material {}", path.display(), table.material),
            });
        }
        table.validate()?;

        Ok(table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTables {
    tables: HashMap<String, AbsorptionTable>,
}

impl InMemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: AbsorptionTable) -> Self {
        self.tables.insert(table.material.clone(), table);
        self
    }
}

impl AbsorptionSource for InMemoryTables {
    fn load(&self, material: &str) -> Result<AbsorptionTable> {
        self.tables
            .get(material)
            .cloned()
            .ok_or_else(|| Error::UnknownMaterial {
                material: material.to_string(),
            })
    }
}

/// Transmission at the fundamental and at the third harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TransmissionPair {
    pub fundamental: f64,
    /// `None` when three times the photon energy is past the end of the
    /// table.
    pub third_harmonic: Option<f64>,
}

pub struct TransmissionModel {
    source: Box<dyn AbsorptionSource>,
    cache: RwLock<HashMap<String, Arc<AbsorptionTable>>>,
}

impl TransmissionModel {
    pub fn new(source: impl AbsorptionSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached table for `material`, loading it on first use. Failed loads
    /// are not cached.
    pub fn table(&self, material: &str) -> Result<Arc<AbsorptionTable>> {
        if let Some(table) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(material)
        {
            return Ok(table.clone());
        }

        let table = Arc::new(self.source.load(material)?);
        let (min, max) = table.energy_range();
        info!(material, min, max, "Loaded absorption table");

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache
            .entry(material.to_string())
            .or_insert(table)
            .clone())
    }

    pub fn transmission(&self, material: &str, thickness: f64, photon_energy: f64) -> Result<f64> {
        self.table(material)?.transmission(thickness, photon_energy)
    }

    pub fn transmission_pair(
        &self,
        material: &str,
        thickness: f64,
        photon_energy: f64,
    ) -> Result<TransmissionPair> {
        let table = self.table(material)?;
        let fundamental = table.transmission(thickness, photon_energy)?;

        let third_harmonic = match table.transmission(thickness, 3.0 * photon_energy) {
            Ok(value) => Some(value),
            Err(Error::EnergyOutOfRange { .. }) => {
                debug!(material, photon_energy, "Third harmonic is outside the table");
                None
            }
            Err(err) => return Err(err),
        };

        Ok(TransmissionPair {
            fundamental,
            third_harmonic,
        })
    }

    pub fn cached_materials(&self) -> Vec<String> {
        let mut materials: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        materials.sort();
        materials
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn silicon() -> AbsorptionTable {
        AbsorptionTable::new(
            "Si",
            2.33,
            vec![
                [1000.0, 1570.0],
                [1838.9, 309.2],
                [1838.9, 3192.0],
                [2000.0, 2777.0],
                [5000.0, 245.0],
                [10000.0, 34.61],
                [20000.0, 4.464],
                [30000.0, 1.436],
            ],
        )
        .unwrap()
    }

    pub(crate) fn diamond() -> AbsorptionTable {
        AbsorptionTable::new(
            "C",
            3.51,
            vec![
                [1000.0, 2211.0],
                [5000.0, 19.12],
                [10000.0, 2.373],
                [20000.0, 0.442],
                [30000.0, 0.2562],
            ],
        )
        .unwrap()
    }

    pub(crate) fn model() -> TransmissionModel {
        TransmissionModel::new(
            InMemoryTables::new()
                .with_table(silicon())
                .with_table(diamond()),
        )
    }

    struct CountingSource {
        loads: Arc<AtomicUsize>,
    }

    impl AbsorptionSource for CountingSource {
        fn load(&self, material: &str) -> Result<AbsorptionTable> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            InMemoryTables::new().with_table(silicon()).load(material)
        }
    }

    #[test]
    fn beer_lambert_at_table_point() {
        let model = model();
        // 100 um of Si at 10 keV: exp(-34.61 * 2.33 * 0.01)
        let t = model.transmission("Si", 100e-6, 10000.0).unwrap();
        assert_relative_eq!(t, (-34.61f64 * 2.33 * 0.01).exp(), max_relative = 1e-12);
    }

    #[test]
    fn interpolates_in_log_log_space() {
        let table = silicon();
        let mu = table.attenuation_coefficient(15000.0).unwrap();
        let expected = (34.61f64.ln()
            + (15000f64.ln() - 10000f64.ln()) / (20000f64.ln() - 10000f64.ln())
                * (4.464f64.ln() - 34.61f64.ln()))
        .exp();
        assert_relative_eq!(mu, expected, max_relative = 1e-12);
        assert!(mu < 34.61 && mu > 4.464);
    }

    #[test]
    fn edge_takes_value_above_edge() {
        let table = silicon();
        assert_relative_eq!(table.attenuation_coefficient(1838.9).unwrap(), 3192.0);
        assert!(table.attenuation_coefficient(1838.0).unwrap() < 400.0);
    }

    #[test]
    fn table_points_are_reproduced_exactly() {
        let table = silicon();
        for [energy, mu] in &table.points[..table.points.len() - 1] {
            if *energy == 1838.9 {
                continue;
            }
            assert_eq!(table.attenuation_coefficient(*energy).unwrap(), *mu, "{energy}");
        }
        assert_eq!(table.attenuation_coefficient(1838.9).unwrap(), 3192.0);
    }

    #[test]
    fn shipped_tables_cover_soft_x_rays() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/absorption");
        let model = TransmissionModel::new(TableDirectory::new(dir));
        for material in ["C", "Si", "Al"] {
            let (min, max) = model.table(material).unwrap().energy_range();
            assert!(min <= 250.0 && max >= 30000.0, "{material}: [{min}, {max}]");
            for energy in [500.0, 1000.0, 2500.0, 4500.0] {
                let t = model.transmission(material, 1e-6, energy).unwrap();
                assert!(t > 0.0 && t < 1.0, "{material} at {energy} eV: {t}");
            }
        }
    }

    #[test]
    fn table_end_points_are_inclusive() {
        let table = silicon();
        assert_relative_eq!(table.attenuation_coefficient(1000.0).unwrap(), 1570.0);
        assert_relative_eq!(table.attenuation_coefficient(30000.0).unwrap(), 1.436);
    }

    #[test]
    fn zero_thickness_is_fully_transmissive() {
        assert_relative_eq!(model().transmission("C", 0.0, 8000.0).unwrap(), 1.0);
    }

    #[test]
    fn rejects_unknown_material() {
        let err = model().transmission("Au", 1e-6, 8000.0).unwrap_err();
        assert!(matches!(err, Error::UnknownMaterial { material } if material == "Au"));
    }

    #[test]
    fn does_not_extrapolate() {
        let model = model();
        for energy in [999.0, 30001.0, f64::NAN] {
            let err = model.transmission("Si", 1e-6, energy).unwrap_err();
            assert!(matches!(err, Error::EnergyOutOfRange { .. }), "{energy}");
        }
    }

    #[test]
    fn third_harmonic_past_table_end_is_absent() {
        let model = model();
        let pair = model.transmission_pair("C", 50e-6, 9000.0).unwrap();
        assert!(pair.third_harmonic.is_some());
        assert!(pair.third_harmonic.unwrap() > pair.fundamental);

        let pair = model.transmission_pair("C", 50e-6, 12000.0).unwrap();
        assert!(pair.third_harmonic.is_none());
        assert!(pair.fundamental > 0.0 && pair.fundamental < 1.0);
    }

    #[test]
    fn tables_are_loaded_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let model = TransmissionModel::new(CountingSource {
            loads: loads.clone(),
        });

        for _ in 0..5 {
            model.transmission("Si", 1e-6, 5000.0).unwrap();
        }
        assert!(model.transmission("C", 1e-6, 5000.0).is_err());
        assert!(model.transmission("C", 1e-6, 5000.0).is_err());

        // One successful Si load, two failed C attempts.
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        assert_eq!(model.cached_materials(), vec!["Si".to_string()]);
    }

    #[test]
    fn cache_is_shared_across_threads() {
        let model = Arc::new(model());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let model = model.clone();
                std::thread::spawn(move || model.transmission("Si", 10e-6, 8000.0).unwrap())
            })
            .collect();
        let values: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn validate_rejects_bad_tables() {
        assert!(AbsorptionTable::new("X", 1.0, vec![[1000.0, 1.0]]).is_err());
        assert!(AbsorptionTable::new("X", 0.0, vec![[1000.0, 1.0], [2000.0, 0.5]]).is_err());
        assert!(AbsorptionTable::new("X", 1.0, vec![[2000.0, 1.0], [1000.0, 0.5]]).is_err());
        assert!(AbsorptionTable::new("X", 1.0, vec![[1000.0, -1.0], [2000.0, 0.5]]).is_err());
    }

    #[test]
    fn reads_tables_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let table = diamond();
        fs::write(dir.path().join("C.toml"), toml::to_string(&table).unwrap()).unwrap();
        fs::write(
            dir.path().join("Al.toml"),
            "material = \"Si\"\ndensity = 2.7\npoints = [[1000.0, 1.0], [2000.0, 0.5]]\n",
        )
        .unwrap();
        fs::write(dir.path().join("B.toml"), "density = ").unwrap();

        let source = TableDirectory::new(dir.path());
        let loaded = source.load("C").unwrap();
        assert_eq!(loaded.points, table.points);

        assert!(matches!(source.load("Si"), Err(Error::UnknownMaterial { .. })));
        assert!(matches!(source.load("../C"), Err(Error::UnknownMaterial { .. })));
        assert!(matches!(source.load("Al"), Err(Error::InvalidTable { .. })));
        assert!(matches!(source.load("B"), Err(Error::TableParse { .. })));
    }
}
