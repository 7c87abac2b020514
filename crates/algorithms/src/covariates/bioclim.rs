//! Bioclimatic indices from monthly climate stacks (WorldClim definitions).
//!
//! All inputs must already share the reference grid. A cell is NaN in an
//! output when any month it depends on is missing.

use crate::maybe_rayon::*;
use birdocc_core::{Error, Raster, Result};
use ndarray::Array2;

/// Twelve monthly layers, January first
pub type MonthlyStack = [Raster<f64>];

#[derive(Debug, Clone)]
pub struct Bioclim {
    /// BIO1 annual mean temperature
    pub bio1: Raster<f64>,
    /// BIO4 temperature seasonality, 100 x standard deviation
    pub bio4: Raster<f64>,
    /// BIO12 annual precipitation
    pub bio12: Raster<f64>,
    /// BIO15 precipitation seasonality, coefficient of variation of (prec + 1)
    pub bio15: Raster<f64>,
    /// BIO2 mean diurnal range, when min/max stacks are given
    pub bio2: Option<Raster<f64>>,
    /// BIO7 annual temperature range, when min/max stacks are given
    pub bio7: Option<Raster<f64>>,
}

impl Bioclim {
    /// (name, layer) pairs in output order
    pub fn layers(&self) -> Vec<(&'static str, &Raster<f64>)> {
        let mut out = vec![
            ("bio1", &self.bio1),
            ("bio4", &self.bio4),
            ("bio12", &self.bio12),
            ("bio15", &self.bio15),
        ];
        if let Some(b) = &self.bio2 {
            out.push(("bio2", b));
        }
        if let Some(b) = &self.bio7 {
            out.push(("bio7", b));
        }
        out
    }
}

fn check_stack(name: &'static str, stack: &MonthlyStack, shape: (usize, usize)) -> Result<()> {
    if stack.len() != 12 {
        return Err(Error::InvalidParameter {
            name,
            value: stack.len().to_string(),
            reason: "expected 12 monthly layers".into(),
        });
    }
    for layer in stack {
        if layer.shape() != shape {
            return Err(Error::SizeMismatch {
                er: shape.0,
                ec: shape.1,
                ar: layer.rows(),
                ac: layer.cols(),
            });
        }
    }
    Ok(())
}

/// Apply `f` to the monthly series of every cell of `stacks`
fn per_cell<F>(template: &Raster<f64>, stacks: &[&MonthlyStack], f: F) -> Result<Raster<f64>>
where
    F: Fn(&[[f64; 12]]) -> f64 + Sync + Send,
{
    let (rows, cols) = template.shape();
    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut series = vec![[0.0; 12]; stacks.len()];
            let mut out = vec![f64::NAN; cols];
            for (col, cell) in out.iter_mut().enumerate() {
                let mut complete = true;
                for (s, stack) in stacks.iter().enumerate() {
                    for (m, layer) in stack.iter().enumerate() {
                        let v = layer.data()[(row, col)];
                        if layer.is_nodata(v) {
                            complete = false;
                        }
                        series[s][m] = v;
                    }
                }
                if complete {
                    *cell = f(&series);
                }
            }
            out
        })
        .collect();

    let mut out = template.with_same_meta::<f64>(rows, cols);
    out.set_nodata(Some(f64::NAN));
    *out.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(out)
}

fn mean12(v: &[f64; 12]) -> f64 {
    v.iter().sum::<f64>() / 12.0
}

fn sd12(v: &[f64; 12]) -> f64 {
    let m = mean12(v);
    (v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / 11.0).sqrt()
}

/// Compute BIO1, BIO4, BIO12, BIO15 and, with `tmin`/`tmax`, BIO2 and BIO7
pub fn bioclim(
    tavg: &MonthlyStack,
    prec: &MonthlyStack,
    tmin_tmax: Option<(&MonthlyStack, &MonthlyStack)>,
) -> Result<Bioclim> {
    let template = tavg.first().ok_or(Error::InvalidParameter {
        name: "tavg",
        value: "0".into(),
        reason: "expected 12 monthly layers".into(),
    })?;
    let shape = template.shape();
    check_stack("tavg", tavg, shape)?;
    check_stack("prec", prec, shape)?;

    let bio1 = per_cell(template, &[tavg], |s| mean12(&s[0]))?;
    let bio4 = per_cell(template, &[tavg], |s| 100.0 * sd12(&s[0]))?;
    let bio12 = per_cell(template, &[prec], |s| s[0].iter().sum())?;
    let bio15 = per_cell(template, &[prec], |s| {
        let shifted = s[0].map(|p| p + 1.0);
        100.0 * sd12(&shifted) / mean12(&shifted)
    })?;

    let (bio2, bio7) = match tmin_tmax {
        Some((tmin, tmax)) => {
            check_stack("tmin", tmin, shape)?;
            check_stack("tmax", tmax, shape)?;
            let bio2 = per_cell(template, &[tmin, tmax], |s| {
                (0..12).map(|m| s[1][m] - s[0][m]).sum::<f64>() / 12.0
            })?;
            let bio7 = per_cell(template, &[tmin, tmax], |s| {
                let hi = s[1].iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let lo = s[0].iter().copied().fold(f64::INFINITY, f64::min);
                hi - lo
            })?;
            (Some(bio2), Some(bio7))
        }
        None => (None, None),
    };

    Ok(Bioclim {
        bio1,
        bio4,
        bio12,
        bio15,
        bio2,
        bio7,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stack(values: [f64; 12]) -> Vec<Raster<f64>> {
        values.iter().map(|v| Raster::filled(2, 2, *v)).collect()
    }

    #[test]
    fn test_constant_climate() {
        let tavg = stack([20.0; 12]);
        let prec = stack([99.0; 12]);
        let b = bioclim(&tavg, &prec, None).unwrap();
        assert_relative_eq!(b.bio1.get(0, 0).unwrap(), 20.0);
        assert_relative_eq!(b.bio4.get(0, 0).unwrap(), 0.0);
        assert_relative_eq!(b.bio12.get(1, 1).unwrap(), 1188.0);
        assert_relative_eq!(b.bio15.get(1, 1).unwrap(), 0.0);
        assert!(b.bio2.is_none());
        assert_eq!(b.layers().len(), 4);
    }

    #[test]
    fn test_seasonal_climate() {
        let months: [f64; 12] = std::array::from_fn(|m| m as f64);
        let tavg = stack(months);
        let prec = stack(std::array::from_fn(|m| if m < 6 { 0.0 } else { 198.0 }));
        let tmin = stack([10.0; 12]);
        let tmax = stack(std::array::from_fn(|m| 15.0 + m as f64));
        let b = bioclim(&tavg, &prec, Some((&tmin, &tmax))).unwrap();

        // sample SD of 0..11 = sqrt(13)
        assert_relative_eq!(b.bio4.get(0, 0).unwrap(), 100.0 * 13.0_f64.sqrt(), epsilon = 1e-9);
        // prec+1 is 1 or 199: mean 100, sd = 99 * sqrt(12/11)
        assert_relative_eq!(
            b.bio15.get(0, 0).unwrap(),
            99.0 * (12.0_f64 / 11.0).sqrt(),
            epsilon = 1e-9
        );
        assert_relative_eq!(b.bio2.as_ref().unwrap().get(0, 0).unwrap(), 10.5);
        assert_relative_eq!(b.bio7.as_ref().unwrap().get(0, 0).unwrap(), 16.0);
        assert_eq!(b.layers().len(), 6);
    }

    #[test]
    fn test_missing_month_propagates() {
        let mut tavg = stack([20.0; 12]);
        tavg[5].set(0, 1, f64::NAN).unwrap();
        let b = bioclim(&tavg, &stack([1.0; 12]), None).unwrap();
        assert!(b.bio1.get(0, 1).unwrap().is_nan());
        assert!(!b.bio12.get(0, 1).unwrap().is_nan());
    }

    #[test]
    fn test_wrong_month_count_rejected() {
        let tavg = stack([20.0; 12]);
        let prec: Vec<_> = stack([1.0; 12]).into_iter().take(11).collect();
        assert!(bioclim(&tavg, &prec, None).is_err());
    }
}
