//! Land-cover reclassification

use birdocc_core::config::LandcoverClass;
use birdocc_core::{Error, Raster, Result};
use std::collections::HashMap;

/// Map raw land-cover codes to grouped class indices: the i-th configured
/// class becomes `i + 1`, anything unlisted or no-data becomes 0.
pub fn reclassify_landcover(raster: &Raster<f64>, classes: &[LandcoverClass]) -> Result<Raster<f64>> {
    let mut lookup: HashMap<i64, f64> = HashMap::new();
    for (i, class) in classes.iter().enumerate() {
        for &code in &class.codes {
            if let Some(prev) = lookup.insert(code as i64, (i + 1) as f64) {
                return Err(Error::InvalidParameter {
                    name: "landcover_classes",
                    value: code.to_string(),
                    reason: format!(
                        "code listed in both class {} and class {}",
                        prev as usize,
                        i + 1
                    ),
                });
            }
        }
    }

    let mut out = raster.clone();
    let nodata = raster.nodata();
    out.data_mut().mapv_inplace(|v| {
        if v.is_nan() || nodata.map_or(false, |nd| v == nd) {
            0.0
        } else {
            lookup.get(&(v.round() as i64)).copied().unwrap_or(0.0)
        }
    });
    out.set_nodata(None);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<LandcoverClass> {
        vec![
            LandcoverClass {
                name: "forest".into(),
                codes: vec![1, 2, 3],
            },
            LandcoverClass {
                name: "agriculture".into(),
                codes: vec![10],
            },
        ]
    }

    #[test]
    fn test_reclassify_groups_codes() {
        let mut raw = Raster::from_vec(vec![1.0, 3.0, 10.0, 99.0, f64::NAN, 255.0], 2, 3).unwrap();
        raw.set_nodata(Some(255.0));
        let out = reclassify_landcover(&raw, &classes()).unwrap();
        assert_eq!(
            out.data().iter().copied().collect::<Vec<_>>(),
            vec![1.0, 1.0, 2.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_overlapping_codes_rejected() {
        let mut cls = classes();
        cls[1].codes.push(2);
        let raw = Raster::filled(1, 1, 1.0);
        assert!(reclassify_landcover(&raw, &cls).is_err());
    }
}
