use crate::consts::{CLIP_LOWER, CLIP_UPPER};
use crate::error::Result;

use super::options::DivisionMode;
use super::working_set::{PsfBuffers, WorkingSet};

/// Run the Richardson-Lucy update loop over one channel batch, mutating the
/// estimate in place. Each step, in strict order:
///
/// 1. predicted = correlate(estimate, psf)
/// 2. ratio = observed / predicted, stabilized per `division`
/// 3. correction = correlate(ratio, flipped psf)
/// 4. estimate *= correction
/// 5. if `clip`, clamp the estimate into [-1, 1]
///
/// Zero iterations leaves the estimate equal to the initial image copy. The
/// first kernel failure aborts the remaining iterations and propagates; the
/// working set's buffers are released by its drop.
pub fn run(
    ws: &mut WorkingSet<'_>,
    psf: &PsfBuffers,
    iterations: usize,
    division: DivisionMode,
    clip: bool,
) -> Result<()> {
    let backend = ws.backend;
    let shape = ws.shape;

    for _ in 0..iterations {
        backend.correlate(&ws.estimate, &psf.forward, &mut ws.scratch, shape)?;

        match division {
            DivisionMode::Stabilized { epsilon } => {
                backend.divide(&ws.image, &ws.scratch, &mut ws.ratio, epsilon)?
            }
            DivisionMode::Thresholded { threshold } => {
                backend.divide_filtered(&ws.image, &ws.scratch, &mut ws.ratio, threshold)?
            }
        }

        backend.correlate(&ws.ratio, &psf.backward, &mut ws.scratch, shape)?;
        backend.multiply_assign(&mut ws.estimate, &ws.scratch)?;

        if clip {
            backend.clip(&mut ws.estimate, CLIP_LOWER, CLIP_UPPER)?;
        }
    }

    Ok(())
}
