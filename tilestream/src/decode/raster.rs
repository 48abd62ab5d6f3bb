//! Bitmap tile decoder.

use image::GenericImageView;

use super::{DecodeError, TileDecoder};
use crate::element::{RasterTile, TileSink};

/// Decodes bitmap tiles (PNG, JPEG, WebP) into RGBA pixel buffers.
///
/// The container format is detected from the payload bytes, so one decoder
/// instance serves mixed-format tile sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterTileDecoder;

impl RasterTileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_inner(data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError> {
        let img = image::load_from_memory(data)?;
        let (width, height) = img.dimensions();
        let rgba = img.into_rgba8().into_raw();
        sink.set_raster(RasterTile {
            width,
            height,
            rgba,
        });
        Ok(())
    }
}

impl TileDecoder for RasterTileDecoder {
    fn decode(&self, data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError> {
        match Self::decode_inner(data, sink) {
            Ok(()) => {
                sink.completed(true);
                Ok(())
            }
            Err(e) => {
                sink.completed(false);
                Err(e)
            }
        }
    }
}
