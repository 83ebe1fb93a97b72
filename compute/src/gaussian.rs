use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{ComputeArray, ComputeError, Result};

static NEXT_GAUSSIAN_ID: AtomicU64 = AtomicU64::new(1);

/// Loose gaussian arrays as produced by a file parser or handed in by an embedder.
///
/// Layout follows the usual splat conventions: `means` and `scales` hold three floats per
/// gaussian, `scales` are log-scales, `opacities` are logits, `quaternions` are `w, x, y, z`.
#[derive(Debug, Default)]
pub struct GaussianDataDesc {
    pub means: Option<ComputeArray>,
    pub opacities: Option<ComputeArray>,
    pub quaternions: Option<ComputeArray>,
    pub scales: Option<ComputeArray>,
    pub sh_0: Option<ComputeArray>,
    pub sh_n: Option<ComputeArray>,
}

/// Validated gaussian set. The arrays are shared so a pipeline can reference them without
/// copying.
#[derive(Debug)]
pub struct GaussianData {
    id: u64,
    count: usize,
    pub means: Arc<ComputeArray>,
    pub opacities: Option<Arc<ComputeArray>>,
    pub quaternions: Option<Arc<ComputeArray>>,
    pub scales: Option<Arc<ComputeArray>>,
    pub sh_0: Option<Arc<ComputeArray>>,
    pub sh_n: Option<Arc<ComputeArray>>,
}

fn check_len(name: &str, array: &Option<ComputeArray>, count: usize, per_gaussian: usize) -> Result<()> {
    if let Some(array) = array {
        let floats = array.len_bytes() / size_of::<f32>();
        if floats != count * per_gaussian {
            return Err(ComputeError::InvalidGaussianData(format!(
                "'{name}' holds {floats} floats, expected {}",
                count * per_gaussian
            )));
        }
    }
    Ok(())
}

impl GaussianData {
    pub fn from_desc(desc: GaussianDataDesc) -> Result<Self> {
        let means = desc
            .means
            .ok_or_else(|| ComputeError::InvalidGaussianData("missing 'means' array".to_string()))?;
        let floats = means.len_bytes() / size_of::<f32>();
        if floats % 3 != 0 {
            return Err(ComputeError::InvalidGaussianData(format!(
                "'means' length {floats} is not a multiple of 3"
            )));
        }
        let count = floats / 3;

        check_len("opacities", &desc.opacities, count, 1)?;
        check_len("quaternions", &desc.quaternions, count, 4)?;
        check_len("scales", &desc.scales, count, 3)?;
        check_len("sh_0", &desc.sh_0, count, 3)?;
        if let Some(sh_n) = &desc.sh_n {
            let floats = sh_n.len_bytes() / size_of::<f32>();
            if count == 0 || floats % (count * 3) != 0 {
                return Err(ComputeError::InvalidGaussianData(format!(
                    "'sh_n' length {floats} does not divide into {count} gaussians"
                )));
            }
        }

        Ok(Self {
            id: NEXT_GAUSSIAN_ID.fetch_add(1, Ordering::Relaxed),
            count,
            means: Arc::new(means),
            opacities: desc.opacities.map(Arc::new),
            quaternions: desc.quaternions.map(Arc::new),
            scales: desc.scales.map(Arc::new),
            sh_0: desc.sh_0.map(Arc::new),
            sh_n: desc.sh_n.map(Arc::new),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Looks up one of the six arrays by its conventional name.
    pub fn array(&self, name: &str) -> Option<&Arc<ComputeArray>> {
        match name {
            "means" => Some(&self.means),
            "opacities" => self.opacities.as_ref(),
            "quaternions" => self.quaternions.as_ref(),
            "scales" => self.scales.as_ref(),
            "sh_0" => self.sh_0.as_ref(),
            "sh_n" => self.sh_n.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_lengths() {
        let desc = GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32; 6])),
            opacities: Some(ComputeArray::from_slice(&[0.0f32; 2])),
            scales: Some(ComputeArray::from_slice(&[0.0f32; 5])),
            ..Default::default()
        };
        assert!(matches!(
            GaussianData::from_desc(desc),
            Err(ComputeError::InvalidGaussianData(_))
        ));

        let desc = GaussianDataDesc {
            means: Some(ComputeArray::from_slice(&[0.0f32; 6])),
            quaternions: Some(ComputeArray::from_slice(&[1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0])),
            ..Default::default()
        };
        let data = GaussianData::from_desc(desc).unwrap();
        assert_eq!(data.count(), 2);
        assert!(data.array("means").is_some());
        assert!(data.array("scales").is_none());
    }

    #[test]
    fn means_are_required() {
        assert!(GaussianData::from_desc(GaussianDataDesc::default()).is_err());
    }
}
