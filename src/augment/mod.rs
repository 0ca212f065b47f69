//! Image augmentation: each source image fans out into a fixed set of named
//! variants, the unmodified original included.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use rand::Rng;

pub const ORIGINAL: &str = "original";
pub const ROTATE: &str = "rotate";
pub const CROP: &str = "crop";
pub const FLIP: &str = "flip";
pub const COLOR_JITTER: &str = "color_jitter";

/// One derived image and the name it is stored under.
#[derive(Debug, Clone)]
pub struct Variant {
    pub name: &'static str,
    pub image: DynamicImage,
}

/// Produces a fixed number of variants per image. Pure; no failure path.
pub trait Augmenter: Send + Sync {
    fn augment(&self, image: &DynamicImage) -> Vec<Variant>;

    /// Number of variants `augment` returns for every image.
    fn variant_count(&self) -> usize;
}

/// Rotation, random resized crop, horizontal flip and colour jitter, plus the
/// original.
#[derive(Debug, Clone)]
pub struct StandardAugmenter {
    pub max_rotation_degrees: f32,
    pub crop_size: u32,
    pub crop_scale: (f32, f32),
    pub brightness: f32,
    pub contrast: f32,
    pub hue: f32,
}

impl Default for StandardAugmenter {
    fn default() -> Self {
        Self {
            max_rotation_degrees: 15.0,
            crop_size: 224,
            crop_scale: (0.8, 1.0),
            brightness: 0.2,
            contrast: 0.2,
            hue: 0.1,
        }
    }
}

impl StandardAugmenter {
    fn rotate(&self, image: &DynamicImage, rng: &mut impl Rng) -> DynamicImage {
        let degrees = rng.gen_range(-self.max_rotation_degrees..=self.max_rotation_degrees);
        DynamicImage::ImageRgba8(rotate_about_center(&image.to_rgba8(), degrees.to_radians()))
    }

    fn random_resized_crop(&self, image: &DynamicImage, rng: &mut impl Rng) -> DynamicImage {
        let (width, height) = image.dimensions();
        let area = (width as f32) * (height as f32);
        let scale = rng.gen_range(self.crop_scale.0..=self.crop_scale.1);
        let ratio = rng.gen_range((3.0f32 / 4.0).ln()..=(4.0f32 / 3.0).ln()).exp();

        let target = area * scale;
        let crop_w = ((target * ratio).sqrt().round() as u32).clamp(1, width.max(1));
        let crop_h = ((target / ratio).sqrt().round() as u32).clamp(1, height.max(1));
        let x = rng.gen_range(0..=width.saturating_sub(crop_w));
        let y = rng.gen_range(0..=height.saturating_sub(crop_h));

        image
            .crop_imm(x, y, crop_w, crop_h)
            .resize_exact(self.crop_size, self.crop_size, FilterType::Triangle)
    }

    fn color_jitter(&self, image: &DynamicImage, rng: &mut impl Rng) -> DynamicImage {
        let brightness = rng.gen_range(-self.brightness..=self.brightness);
        let contrast = rng.gen_range(-self.contrast..=self.contrast);
        let hue = rng.gen_range(-self.hue..=self.hue);

        image
            .brighten((brightness * 255.0).round() as i32)
            .adjust_contrast(contrast * 100.0)
            .huerotate((hue * 360.0).round() as i32)
    }
}

impl Augmenter for StandardAugmenter {
    fn augment(&self, image: &DynamicImage) -> Vec<Variant> {
        let mut rng = rand::thread_rng();
        vec![
            Variant {
                name: ORIGINAL,
                image: image.clone(),
            },
            Variant {
                name: ROTATE,
                image: self.rotate(image, &mut rng),
            },
            Variant {
                name: CROP,
                image: self.random_resized_crop(image, &mut rng),
            },
            Variant {
                name: FLIP,
                image: DynamicImage::ImageRgba8(imageops::flip_horizontal(&image.to_rgba8())),
            },
            Variant {
                name: COLOR_JITTER,
                image: self.color_jitter(image, &mut rng),
            },
        ]
    }

    fn variant_count(&self) -> usize {
        5
    }
}

/// Nearest-neighbour rotation about the image centre; uncovered pixels are
/// transparent black.
fn rotate_about_center(src: &RgbaImage, radians: f32) -> RgbaImage {
    let (width, height) = src.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin, cos) = radians.sin_cos();

    RgbaImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        // Inverse mapping from destination to source.
        let sx = (cos * dx + sin * dy + cx).round();
        let sy = (-sin * dx + cos * dy + cy).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}
