use anyhow::Result;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::GestureError;
use crate::io::tokens::{FieldWriter, TokenReader};
use crate::math::{rng_from_seed, Array2};
use crate::stats::{arg_min, squared_euclidean_distance};

/// Lloyd's k-means over the rows of a matrix.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub num_clusters: usize,
    pub max_iterations: usize,
    pub min_change: f64,
    pub seed: Option<u64>,
    centers: Option<Array2<f64>>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            num_clusters: 10,
            max_iterations: 100,
            min_change: 1.0e-5,
            seed: None,
            centers: None,
        }
    }
}

impl KMeans {
    pub fn new(num_clusters: usize) -> Result<Self> {
        if num_clusters == 0 {
            return Err(GestureError::Configuration("k-means needs at least one cluster".to_string()).into());
        }
        Ok(Self {
            num_clusters,
            ..Self::default()
        })
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_trained(&self) -> bool {
        self.centers.is_some()
    }

    pub fn centers(&self) -> Option<&Array2<f64>> {
        self.centers.as_ref()
    }

    pub fn clear(&mut self) {
        self.centers = None;
    }

    /// Fits the cluster centres to the rows of `data`, starting from
    /// k-means++ seeds.
    pub fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        let (n, dims) = data.shape();
        if n < self.num_clusters {
            return Err(GestureError::Data(format!(
                "k-means needs at least {} rows but got {}",
                self.num_clusters, n
            ))
            .into());
        }
        if !data.all_finite() {
            return Err(GestureError::Data("k-means input contains non-finite values".to_string()).into());
        }

        let mut rng = rng_from_seed(self.seed);
        let mut centers = data.select_rows(&seed_centers(data, self.num_clusters, &mut rng));
        let mut assignments = vec![usize::MAX; n];

        for iter in 0..self.max_iterations {
            let mut changed = 0;
            for (i, row) in data.rows().enumerate() {
                let nearest = nearest_center(&centers, row);
                if assignments[i] != nearest {
                    assignments[i] = nearest;
                    changed += 1;
                }
            }

            let mut sums = Array2::<f64>::zeros(self.num_clusters, dims);
            let mut counts = vec![0usize; self.num_clusters];
            for (row, &cluster) in data.rows().zip(&assignments) {
                counts[cluster] += 1;
                for (s, v) in sums.row_mut(cluster).iter_mut().zip(row) {
                    *s += v;
                }
            }

            let mut shift = 0.0;
            for (cluster, &count) in counts.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let old = centers.row(cluster).to_vec();
                let new: Vec<f64> = sums.row(cluster).iter().map(|s| s / count as f64).collect();
                shift += squared_euclidean_distance(&old, &new);
                centers.row_mut(cluster).copy_from_slice(&new);
            }

            log::trace!("k-means iteration {}: {} reassignments, centre shift {:.3e}", iter, changed, shift);
            if changed == 0 || shift < self.min_change {
                break;
            }
        }

        self.centers = Some(centers);
        Ok(())
    }

    /// Index of the nearest centre.
    pub fn predict(&self, x: &[f64]) -> Result<usize> {
        let centers = self.trained_centers(x.len())?;
        Ok(nearest_center(centers, x))
    }

    /// Squared distances from `x` to every centre.
    pub fn distances(&self, x: &[f64]) -> Result<Vec<f64>> {
        let centers = self.trained_centers(x.len())?;
        Ok(centers.rows().map(|c| squared_euclidean_distance(c, x)).collect())
    }

    fn trained_centers(&self, dims: usize) -> Result<&Array2<f64>> {
        let Some(centers) = self.centers.as_ref() else {
            return Err(GestureError::Precondition("k-means model is not trained".to_string()).into());
        };
        if dims != centers.ncols() {
            return Err(GestureError::Precondition(format!(
                "input has {} dimensions but the clusters have {}",
                dims,
                centers.ncols()
            ))
            .into());
        }
        Ok(centers)
    }

    pub fn save(&self, w: &mut FieldWriter) {
        w.field("NumClusters:", self.num_clusters)
            .field("MaxNumIterations:", self.max_iterations)
            .field("MinChange:", self.min_change)
            .flag("Trained:", self.centers.is_some());
        if let Some(centers) = &self.centers {
            w.field("NumDimensions:", centers.ncols()).line("Clusters:").matrix(centers);
        }
    }

    pub fn load(r: &mut TokenReader<'_>) -> Result<Self> {
        let mut model = Self::new(r.field("NumClusters:")?)?;
        model.max_iterations = r.field("MaxNumIterations:")?;
        model.min_change = r.field("MinChange:")?;
        if r.flag("Trained:")? {
            let dims = r.field::<usize>("NumDimensions:")?;
            r.expect("Clusters:")?;
            model.centers = Some(r.matrix(model.num_clusters, dims)?);
        }
        Ok(model)
    }
}

/// k-means++ seeding: each further seed is drawn with probability
/// proportional to its squared distance from the nearest seed so far.
/// Duplicate rows are only picked once every distinct row is taken.
fn seed_centers<R: Rng + ?Sized>(data: &Array2<f64>, k: usize, rng: &mut R) -> Vec<usize> {
    let n = data.nrows();
    let mut chosen = vec![rng.gen_range(0..n)];
    let mut nearest: Vec<f64> = data.rows().map(|r| squared_euclidean_distance(r, data.row(chosen[0]))).collect();
    while chosen.len() < k {
        let next = match WeightedIndex::new(&nearest) {
            Ok(dist) => dist.sample(rng),
            Err(_) => {
                let remaining: Vec<usize> = (0..n).filter(|i| !chosen.contains(i)).collect();
                remaining[rng.gen_range(0..remaining.len())]
            }
        };
        chosen.push(next);
        for (d, row) in nearest.iter_mut().zip(data.rows()) {
            *d = d.min(squared_euclidean_distance(row, data.row(next)));
        }
    }
    chosen
}

fn nearest_center(centers: &Array2<f64>, x: &[f64]) -> usize {
    let d: Vec<f64> = centers.rows().map(|c| squared_euclidean_distance(c, x)).collect();
    arg_min(&d).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Array2<f64> {
        let mut m = Array2::with_cols(2);
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            m.push_row(&[jitter, jitter]).unwrap();
            m.push_row(&[5.0 + jitter, 5.0 - jitter]).unwrap();
        }
        m
    }

    #[test]
    fn separates_two_blobs() {
        let mut km = KMeans::new(2).unwrap().with_seed(Some(11));
        km.fit(&blobs()).unwrap();
        let a = km.predict(&[0.0, 0.0]).unwrap();
        let b = km.predict(&[5.0, 5.0]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn predict_before_fit_fails() {
        let km = KMeans::new(3).unwrap();
        assert!(km.predict(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn too_few_rows() {
        let mut km = KMeans::new(5).unwrap();
        let m = Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap();
        assert!(km.fit(&m).is_err());
    }
}
