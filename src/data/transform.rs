use image::{imageops, GrayImage, Luma, RgbImage};
use itertools::Itertools;
use rand::Rng;

use super::nyudv2::NyudItem;

/// Image/label pair with matching spatial dimensions, handed between
/// pipeline stages.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: RgbImage,
    pub mask: GrayImage,
}

/// Per-channel intensity statistics applied as the final pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// ImageNet statistics, the constants every split normalizes with.
pub const IMAGENET: Normalization = Normalization {
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
};

/// Training pipeline: rescale so the short side lands in
/// `[base_size / 2, base_size * 2]`, pad up to the crop size when the
/// rescale came out smaller (mask padding uses `fill` so padded pixels stay
/// out of the loss), then take a random `crop_size` square.
///
/// Bilinear for the image, nearest for the mask; interpolating class
/// indices would invent labels.
pub fn random_scale_crop(
    sample: Sample,
    base_size: u32,
    crop_size: u32,
    fill: u8,
    rng: &mut impl Rng,
) -> Sample {
    let (w, h) = sample.image.dimensions();

    let short_size = rng.gen_range(base_size / 2..=base_size * 2);
    let (ow, oh) = if h > w {
        (short_size, (h as f32 * short_size as f32 / w as f32) as u32)
    } else {
        ((w as f32 * short_size as f32 / h as f32) as u32, short_size)
    };

    let image = imageops::resize(&sample.image, ow, oh, imageops::FilterType::Triangle);
    let mask = imageops::resize(&sample.mask, ow, oh, imageops::FilterType::Nearest);

    let (image, mask) = if ow < crop_size || oh < crop_size {
        pad_bottom_right(&image, &mask, crop_size, fill)
    } else {
        (image, mask)
    };

    let (w, h) = image.dimensions();
    let x = rng.gen_range(0..=w - crop_size);
    let y = rng.gen_range(0..=h - crop_size);

    Sample {
        image: imageops::crop_imm(&image, x, y, crop_size, crop_size).to_image(),
        mask: imageops::crop_imm(&mask, x, y, crop_size, crop_size).to_image(),
    }
}

/// Validation/test pipeline: deterministic resize to a `size` square.
pub fn fixed_resize(sample: Sample, size: u32) -> Sample {
    Sample {
        image: imageops::resize(&sample.image, size, size, imageops::FilterType::Triangle),
        mask: imageops::resize(&sample.mask, size, size, imageops::FilterType::Nearest),
    }
}

/// Final stage shared by every pipeline: normalize intensities and flatten
/// into the raw H x W x C / H x W buffers the batcher consumes.
pub fn to_item(sample: Sample, norm: &Normalization) -> NyudItem {
    let (width, height) = sample.image.dimensions();

    let mut image = Vec::with_capacity((width * height * 3) as usize);
    for px in sample.image.pixels() {
        for c in 0..3 {
            image.push((px[c] as f32 / 255.0 - norm.mean[c]) / norm.std[c]);
        }
    }

    let label = sample.mask.pixels().map(|px| px[0] as i64).collect_vec();

    NyudItem {
        image,
        label,
        height: height as usize,
        width: width as usize,
    }
}

fn pad_bottom_right(
    image: &RgbImage,
    mask: &GrayImage,
    crop_size: u32,
    fill: u8,
) -> (RgbImage, GrayImage) {
    let (w, h) = image.dimensions();
    let (pw, ph) = (w.max(crop_size), h.max(crop_size));

    let mut padded_image = RgbImage::new(pw, ph);
    imageops::replace(&mut padded_image, image, 0, 0);
    let mut padded_mask = GrayImage::from_pixel(pw, ph, Luma([fill]));
    imageops::replace(&mut padded_mask, mask, 0, 0);

    (padded_image, padded_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample(width: u32, height: u32, mask_value: u8) -> Sample {
        Sample {
            image: RgbImage::from_pixel(width, height, image::Rgb([128, 64, 32])),
            mask: GrayImage::from_pixel(width, height, Luma([mask_value])),
        }
    }

    #[test]
    fn fixed_resize_is_square_and_keeps_labels() {
        let out = fixed_resize(sample(10, 6, 12), 16);
        assert_eq!(out.image.dimensions(), (16, 16));
        assert_eq!(out.mask.dimensions(), (16, 16));
        // Nearest-neighbor on a constant mask cannot invent values.
        assert!(out.mask.pixels().all(|px| px[0] == 12));
    }

    #[test]
    fn random_scale_crop_yields_crop_size() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let out = random_scale_crop(sample(10, 6, 3), 8, 16, 255, &mut rng);
            assert_eq!(out.image.dimensions(), (16, 16));
            assert_eq!(out.mask.dimensions(), (16, 16));
            // Padded mask pixels, when present, must carry the fill value.
            assert!(out.mask.pixels().all(|px| px[0] == 3 || px[0] == 255));
        }
    }

    #[test]
    fn padding_fills_mask_with_sentinel_and_image_with_zero() {
        let (image, mask) = pad_bottom_right(
            &RgbImage::from_pixel(2, 2, image::Rgb([9, 9, 9])),
            &GrayImage::from_pixel(2, 2, Luma([5])),
            4,
            255,
        );
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(0, 0).0, [9, 9, 9]);
        assert_eq!(image.get_pixel(3, 3).0, [0, 0, 0]);
        assert_eq!(mask.get_pixel(0, 0).0, [5]);
        assert_eq!(mask.get_pixel(3, 3).0, [255]);
    }

    #[test]
    fn to_item_normalizes_per_channel() {
        let item = to_item(sample(2, 1, 7), &IMAGENET);
        assert_eq!(item.height, 1);
        assert_eq!(item.width, 2);
        assert_eq!(item.image.len(), 6);
        assert_eq!(item.label, vec![7, 7]);

        let expected_r = (128.0 / 255.0 - 0.485) / 0.229;
        let expected_g = (64.0 / 255.0 - 0.456) / 0.224;
        let expected_b = (32.0 / 255.0 - 0.406) / 0.225;
        assert!((item.image[0] - expected_r).abs() < 1e-6);
        assert!((item.image[1] - expected_g).abs() < 1e-6);
        assert!((item.image[2] - expected_b).abs() < 1e-6);
    }
}
