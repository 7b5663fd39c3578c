//! Pink gear orientation from pixels.
//!
//! The back pink gear has no trained "good"/"bad" classes, so its direction is
//! read from the crop itself: the side with more dark pixels is where the
//! teeth are. Mostly dark rows at the top and bottom of the crop belong to the
//! frame around the gear and are trimmed first.

use crate::frame::GrayImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeethDirection {
    /// Teeth in the upper half of the view, pointing away from the user.
    Away,
    Toward,
}

#[derive(Clone, Copy, Debug)]
pub struct GearThresholds {
    /// A pixel is dark when its luma is at most this fraction of 255.
    pub dark_pixel: f32,
    /// A row is kept once more than this fraction of its pixels are light.
    pub light_row: f32,
}

/// Estimate which way the gear teeth point. `None` when the whole crop is dark.
pub fn teeth_direction(crop: &GrayImage, thresholds: GearThresholds) -> Option<TeethDirection> {
    if crop.width == 0 || crop.height == 0 {
        return None;
    }
    let dark_cutoff = thresholds.dark_pixel * 255.0;
    let is_dark = |v: u8| v as f32 <= dark_cutoff;
    let light_row = |y: usize| {
        let light = crop.row(y).iter().filter(|&&v| !is_dark(v)).count();
        light as f32 / crop.width as f32 > thresholds.light_row
    };

    let top = (0..crop.height).find(|&y| light_row(y))?;
    let bottom = (top..crop.height).rev().find(|&y| light_row(y))?;
    let rows = bottom - top + 1;

    let mut upper = 0usize;
    let mut lower = 0usize;
    for (i, y) in (top..=bottom).enumerate() {
        let dark = crop.row(y).iter().filter(|&&v| is_dark(v)).count();
        if i * 2 < rows {
            upper += dark;
        } else {
            lower += dark;
        }
    }
    log::debug!("pink gear dark pixels: upper {} lower {}", upper, lower);

    if upper > lower {
        Some(TeethDirection::Away)
    } else {
        Some(TeethDirection::Toward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    const THRESHOLDS: GearThresholds = GearThresholds {
        dark_pixel: 0.3,
        light_row: 0.5,
    };

    /// 20x20 light gear with a dark border band above and below and a strip
    /// of dark "teeth" in one half.
    fn gear_frame(teeth_on_top: bool) -> Frame {
        let mut frame = Frame::filled(20, 24, [230, 120, 180]).unwrap();
        frame.paint_rect([0, 0, 20, 2], [0, 0, 0]);
        frame.paint_rect([0, 22, 20, 24], [0, 0, 0]);
        let teeth_rows = if teeth_on_top { [4, 6] } else { [18, 20] };
        for x in (0..20).step_by(2) {
            frame.paint_rect([x, teeth_rows[0], x + 1, teeth_rows[1]], [10, 10, 10]);
        }
        frame
    }

    #[test]
    fn dark_half_decides_direction() {
        let crop = gear_frame(true).gray_crop([0.0, 0.0, 20.0, 24.0]).unwrap();
        assert_eq!(teeth_direction(&crop, THRESHOLDS), Some(TeethDirection::Away));

        let crop = gear_frame(false).gray_crop([0.0, 0.0, 20.0, 24.0]).unwrap();
        assert_eq!(teeth_direction(&crop, THRESHOLDS), Some(TeethDirection::Toward));
    }

    #[test]
    fn dark_border_rows_do_not_count() {
        // Thick dark band only at the bottom; without trimming it would
        // outweigh the teeth on top.
        let mut frame = gear_frame(true);
        frame.paint_rect([0, 16, 20, 24], [0, 0, 0]);
        let crop = frame.gray_crop([0.0, 0.0, 20.0, 24.0]).unwrap();
        assert_eq!(teeth_direction(&crop, THRESHOLDS), Some(TeethDirection::Away));
    }

    #[test]
    fn all_dark_crop_is_undecided() {
        let frame = Frame::filled(8, 8, [5, 5, 5]).unwrap();
        let crop = frame.gray_crop([0.0, 0.0, 8.0, 8.0]).unwrap();
        assert_eq!(teeth_direction(&crop, THRESHOLDS), None);
    }
}
