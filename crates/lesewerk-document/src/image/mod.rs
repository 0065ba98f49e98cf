// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module — bounded raster decoding and canonical grayscale geometry.

pub mod decode;
pub mod processor;

pub use decode::RasterDecoder;
pub use processor::ImageProcessor;
