//! Morphological cleanup of the binary edge map.
//!
//! Four fixed stencil passes turn the raw Canny output into thin,
//! junction-free, gently curved polyline strokes that the contour
//! extractor can follow: thinning, crossing removal, straightening, and
//! orthogonal-connection removal (the mask sets from the ExCuSe and ElSe
//! algorithms, Fuhl et al. 2015/2016).
//!
//! Every pass mutates the image it reads. That is intentional: a match
//! early in the scan can enable or disable matches later in the same
//! pass, so the row-major sequential order is part of the algorithm.
//! Parallelizing a pass naively across rows changes the output. Border
//! pixels within the stencil radius are never touched.

use image::GrayImage;

/// Run all four cleanup passes in their required order.
pub(crate) fn cleanup(edges: &mut GrayImage) {
    thin_edges(edges);
    break_crossings(edges);
    straighten_edges(edges);
    break_orthogonals(edges);
}

/// Thinning: clear any ON pixel that has an ON vertical neighbor and an
/// ON horizontal neighbor.
///
/// One sweep applies all four 3×3 thinning masks at once. If the pixels
/// marked E are edges, pixel X is removed:
///
/// ```text
/// |_|E|_| |_|E|_| |_|_|_| |_|_|_|
/// |E|X|_| |_|X|E| |E|X|_| |_|X|E|
/// |_|_|_| |_|_|_| |_|E|_| |_|E|_|
/// ```
pub(crate) fn thin_edges(edges: &mut GrayImage) {
    let w = edges.width() as usize;
    let h = edges.height() as usize;
    if w < 3 || h < 3 {
        return;
    }
    let data: &mut [u8] = edges;

    for r in 0..h - 2 {
        let above = r * w;
        let current = above + w;
        let below = current + w;
        for c in 0..w - 2 {
            if (data[above + c + 1] != 0 && data[current + c] != 0)
                || (data[above + c + 1] != 0 && data[current + c + 2] != 0)
                || (data[below + c + 1] != 0 && data[current + c] != 0)
                || (data[below + c + 1] != 0 && data[current + c + 2] != 0)
            {
                data[current + c + 1] = 0;
            }
        }
    }
}

/// Break crossings: clear any pixel with more than two ON neighbors,
/// so that no pixel connects more than two line strands.
pub(crate) fn break_crossings(edges: &mut GrayImage) {
    let w = edges.width() as usize;
    let h = edges.height() as usize;
    if w < 3 || h < 3 {
        return;
    }
    let data: &mut [u8] = edges;

    for r in 0..h - 2 {
        let above = r * w;
        let current = above + w;
        let below = current + w;
        for c in 0..w - 2 {
            let neighbors = u8::from(data[above + c] > 0)
                + u8::from(data[above + c + 1] > 0)
                + u8::from(data[above + c + 2] > 0)
                + u8::from(data[current + c] > 0)
                + u8::from(data[current + c + 2] > 0)
                + u8::from(data[below + c] > 0)
                + u8::from(data[below + c + 1] > 0)
                + u8::from(data[below + c + 2] > 0);
            if neighbors > 2 {
                data[current + c + 1] = 0;
            }
        }
    }
}

/// Straightening: replace one-step L-kinks with straight runs.
///
/// Eight patterns (four ridge shapes with 3- and 4-pixel extents, in
/// four orientations). Applied in the order they appear in the ElSe
/// paper; some patterns overlap and the order of application matters.
#[allow(clippy::too_many_lines)]
pub(crate) fn straighten_edges(edges: &mut GrayImage) {
    let w = edges.width() as usize;
    let h = edges.height() as usize;
    if w < 4 || h < 4 {
        return;
    }
    let data: &mut [u8] = edges;

    for r in 0..h - 3 {
        let row0 = r * w;
        let row1 = row0 + w;
        let row2 = row1 + w;
        let row3 = row2 + w;
        for c in 0..w - 3 {
            if data[row1 + c] != 0 && data[row0 + c + 1] != 0 && data[row1 + c + 2] != 0 {
                //  X
                // XXX
                data[row0 + c + 1] = 0;
                data[row1 + c + 1] = 255;
            }
            if data[row1 + c] != 0
                && data[row0 + c + 1] != 0
                && data[row0 + c + 2] != 0
                && data[row1 + c + 3] != 0
            {
                //  XX
                // XXXX
                data[row0 + c + 1] = 0;
                data[row0 + c + 2] = 0;
                data[row1 + c + 1] = 255;
                data[row1 + c + 2] = 255;
            }
            if data[row0 + c + 1] != 0 && data[row1 + c] != 0 && data[row2 + c + 1] != 0 {
                //  X
                // XX
                //  X
                data[row1 + c] = 0;
                data[row1 + c + 1] = 255;
            }
            if data[row0 + c + 1] != 0
                && data[row1 + c] != 0
                && data[row2 + c] != 0
                && data[row3 + c + 1] != 0
            {
                //  X
                // XX
                // XX
                //  X
                data[row1 + c] = 0;
                data[row2 + c] = 0;
                data[row1 + c + 1] = 255;
                data[row2 + c + 1] = 255;
            }
            if data[row0 + c] != 0 && data[row1 + c + 1] != 0 && data[row2 + c] != 0 {
                // X
                // XX
                // X
                data[row1 + c + 1] = 0;
                data[row1 + c] = 255;
            }
            if data[row0 + c] != 0
                && data[row1 + c + 1] != 0
                && data[row2 + c + 1] != 0
                && data[row3 + c] != 0
            {
                // X
                // XX
                // XX
                // X
                data[row1 + c + 1] = 0;
                data[row2 + c + 1] = 0;
                data[row1 + c] = 255;
                data[row2 + c] = 255;
            }
            if data[row0 + c] != 0 && data[row1 + c + 1] != 0 && data[row0 + c + 2] != 0 {
                // XXX
                //  X
                data[row1 + c + 1] = 0;
                data[row0 + c + 1] = 255;
            }
            if data[row0 + c] != 0
                && data[row1 + c + 1] != 0
                && data[row1 + c + 2] != 0
                && data[row0 + c + 3] != 0
            {
                // XXXX
                //  XX
                data[row1 + c + 1] = 0;
                data[row1 + c + 2] = 0;
                data[row0 + c + 1] = 255;
                data[row0 + c + 2] = 255;
            }
        }
    }
}

/// Remove orthogonal connections: twelve 6×6 patterns that break
/// right-angle joints between strokes.
///
/// The patterns are grouped by the single pixel each group can clear,
/// so every pixel is written at most once per pass and overlapping
/// patterns (e.g. f2 and g2) share their common prefix test.
///
/// ```text
/// +----+----+----+----+
/// |    |d1d3|f1  |g1  |
/// +----+----+----+----+
/// |    |e3  |    |e1  |
/// +----+----+----+----+
/// |f2g2|d2d4|f3f4|    |
/// |    |    |g4  |    |
/// +----+----+----+----+
/// |    |e2  |g3  |e4  |
/// +----+----+----+----+
/// ```
#[allow(clippy::too_many_lines)]
pub(crate) fn break_orthogonals(edges: &mut GrayImage) {
    let w = edges.width() as usize;
    let h = edges.height() as usize;
    if w < 6 || h < 6 {
        return;
    }
    let data: &mut [u8] = edges;

    for r in 0..h - 5 {
        let row0 = r * w;
        let row1 = row0 + w;
        let row2 = row1 + w;
        let row3 = row2 + w;
        let row4 = row3 + w;
        let row5 = row4 + w;
        for c in 0..w - 5 {
            if data[row0 + c + 1] != 0
                && ((data[row0 + c] != 0 && data[row1 + c + 2] != 0 && data[row2 + c + 2] != 0) // d1
                    || (data[row0 + c + 2] != 0 && data[row1 + c] != 0 && data[row2 + c] != 0)) // d3
            {
                data[row0 + c + 1] = 0;
            }

            if data[row0 + c + 2] != 0
                && data[row1 + c + 1] != 0
                && data[row1 + c + 3] != 0
                && data[row2 + c] != 0
                && data[row2 + c + 4] != 0
            {
                data[row0 + c + 2] = 0; // f1
            }

            if data[row0 + c + 3] != 0
                && data[row0 + c + 2] != 0
                && data[row1 + c + 1] != 0
                && data[row1 + c + 4] != 0
                && data[row2 + c] != 0
                && data[row2 + c + 5] != 0
            {
                data[row0 + c + 3] = 0; // g1
            }

            if data[row1 + c + 1] != 0
                && data[row0 + c + 2] != 0
                && data[row0 + c + 3] != 0
                && data[row0 + c + 4] != 0
                && data[row2 + c] != 0
                && data[row3 + c] != 0
                && data[row4 + c] != 0
            {
                data[row1 + c + 1] = 0; // e3
            }

            if data[row1 + c + 3] != 0
                && data[row0 + c] != 0
                && data[row0 + c + 1] != 0
                && data[row0 + c + 2] != 0
                && data[row2 + c + 4] != 0
                && data[row3 + c + 4] != 0
                && data[row4 + c + 4] != 0
            {
                data[row1 + c + 3] = 0; // e1
            }

            if data[row2 + c] != 0
                && data[row1 + c + 1] != 0
                && data[row0 + c + 2] != 0
                && ((data[row3 + c + 1] != 0 && data[row4 + c + 2] != 0) // f2
                    || (data[row3 + c] != 0 && data[row4 + c + 1] != 0 && data[row5 + c + 2] != 0)) // g2
            {
                data[row2 + c] = 0;
            }

            if data[row2 + c + 1] != 0
                && ((data[row0 + c] != 0 && data[row1 + c] != 0 && data[row2 + c + 2] != 0) // d2
                    || (data[row0 + c + 2] != 0 && data[row1 + c + 2] != 0 && data[row2 + c] != 0)) // d4
            {
                data[row2 + c + 1] = 0;
            }

            if data[row2 + c + 2] != 0
                && data[row0 + c] != 0
                && data[row1 + c + 1] != 0
                && ((data[row3 + c + 1] != 0 && data[row4 + c] != 0) // f3
                    || (data[row1 + c + 3] != 0 && data[row0 + c + 4] != 0) // f4
                    || (data[row2 + c + 3] != 0 && data[row1 + c + 4] != 0 && data[row0 + c + 5] != 0)) // g4
            {
                data[row2 + c + 2] = 0;
            }

            if data[row3 + c + 1] != 0
                && data[row0 + c] != 0
                && data[row1 + c] != 0
                && data[row2 + c] != 0
                && data[row4 + c + 2] != 0
                && data[row4 + c + 3] != 0
                && data[row4 + c + 4] != 0
            {
                data[row3 + c + 1] = 0; // e2
            }

            if data[row3 + c + 2] != 0
                && data[row0 + c] != 0
                && data[row1 + c + 1] != 0
                && data[row2 + c + 2] != 0
                && data[row4 + c + 1] != 0
                && data[row5 + c] != 0
            {
                data[row3 + c + 2] = 0; // g3
            }

            if data[row3 + c + 3] != 0
                && data[row0 + c + 4] != 0
                && data[row1 + c + 4] != 0
                && data[row2 + c + 4] != 0
                && data[row4 + c] != 0
                && data[row4 + c + 1] != 0
                && data[row4 + c + 2] != 0
            {
                data[row3 + c + 3] = 0; // e4
            }
        }
    }
}
