use cgmath::{Matrix4, Point3, SquareMatrix};
use image::Rgba;
use relight::viewport::{CameraViewport, PixelRect, TileSize, Tiles, draw_in_subdivisions};
use relight::Deg;

use crate::common::test_utils::{
    ImageFramebuffer, identity_like_view, splat, unproject_pixel_centre,
};

mod common;

fn viewport(width: u32, height: u32) -> CameraViewport {
    CameraViewport::new(
        identity_like_view(),
        cgmath::perspective(Deg(50.0), width as f32 / height as f32, 0.1, 100.0),
        PixelRect::sized(width, height),
    )
}

/// One point per sampled pixel centre, with every pixel next to a 256 tile border
/// included.
fn pixel_centre_points(viewport: &CameraViewport) -> Vec<(Point3<f32>, Rgba<u8>)> {
    let rect = viewport.rect();
    let near_border = |v: u32| v % 256 == 0 || v % 256 == 255;
    let mut points = Vec::new();
    for y in 0..rect.height {
        for x in 0..rect.width {
            let sampled = (x % 3 == 0 && y % 3 == 0) || near_border(x) || near_border(y);
            if !sampled || (near_border(x) && y % 2 == 1) {
                continue;
            }
            let colour = Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8, 255]);
            points.push((unproject_pixel_centre(viewport, x, y), colour));
        }
    }
    points
}

#[test]
fn tiled_draw_matches_a_single_draw() {
    let viewport = viewport(1000, 750);
    let points = pixel_centre_points(&viewport);

    let mut whole = ImageFramebuffer::new(1000, 750);
    let drawn = draw_in_subdivisions(&mut whole, TileSize::unbounded(), &viewport, |fb, vp| {
        splat(fb, vp, &points);
        Ok(())
    })
    .expect("single draw");
    assert_eq!(drawn, 1);
    assert_eq!(whole.flushes, 1);

    let mut tiled = ImageFramebuffer::new(1000, 750);
    let drawn = draw_in_subdivisions(&mut tiled, TileSize::new(256, 256), &viewport, |fb, vp| {
        splat(fb, vp, &points);
        Ok(())
    })
    .expect("tiled draw");
    assert_eq!(drawn, 12);
    assert_eq!(tiled.flushes, 12);

    let mismatches = whole
        .image
        .enumerate_pixels()
        .filter(|(x, y, pixel)| tiled.image.get_pixel(*x, *y) != *pixel)
        .count();
    assert_eq!(mismatches, 0);
    assert!(whole.image.pixels().any(|pixel| pixel.0[3] == 255));
}

#[test]
fn tiles_partition_the_viewport_row_by_row() {
    let viewport = viewport(1000, 750);
    let tiles: Vec<PixelRect> = viewport
        .tiles(TileSize::new(256, 256))
        .map(|tile| tile.rect())
        .collect();

    assert_eq!(tiles.len(), 12);
    assert_eq!(Tiles::count_for(viewport.rect(), TileSize::new(256, 256)), 12);
    assert_eq!(tiles[0], PixelRect::new(0, 0, 256, 256));
    assert_eq!(tiles[3], PixelRect::new(768, 0, 232, 256));
    assert_eq!(tiles[4], PixelRect::new(0, 256, 256, 256));
    assert_eq!(tiles[11], PixelRect::new(768, 512, 232, 238));

    let area: u64 = tiles
        .iter()
        .map(|tile| tile.width as u64 * tile.height as u64)
        .sum();
    assert_eq!(area, 1000 * 750);
    for (i, a) in tiles.iter().enumerate() {
        for b in &tiles[i + 1..] {
            assert!(a.intersect(b).is_none(), "{:?} overlaps {:?}", a, b);
        }
    }
}

#[test]
fn small_viewport_is_drawn_once_without_crop() {
    let viewport = viewport(200, 100);
    let tiles: Vec<CameraViewport> = viewport.tiles(TileSize::default()).collect();

    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0], viewport);
    assert_eq!(tiles[0].crop(), Matrix4::identity());
    assert_eq!(tiles[0].viewport_projection(), viewport.full_projection());
}

#[test]
fn crop_is_applied_on_top_of_the_full_projection() {
    let viewport = viewport(1000, 750);
    for tile in viewport.tiles(TileSize::new(300, 200)) {
        assert_eq!(tile.viewport_projection(), tile.crop() * tile.full_projection());
        assert_eq!(tile.full_projection(), viewport.full_projection());
        assert_eq!(tile.view(), viewport.view());
    }
}

#[test]
fn tile_projection_agrees_with_the_full_viewport() {
    let viewport = viewport(1000, 750);
    let point = unproject_pixel_centre(&viewport, 700, 300);
    let expected = viewport.project(point).expect("in front of the camera");

    for tile in viewport.tiles(TileSize::new(256, 256)) {
        let projected = tile.project(point).expect("in front of the camera");
        assert!((projected.x - expected.x).abs() < 1e-2, "{:?}", projected);
        assert!((projected.y - expected.y).abs() < 1e-2, "{:?}", projected);
    }
}

#[test]
fn degenerate_sizes() {
    assert_eq!(Tiles::count_for(PixelRect::sized(0, 10), TileSize::new(4, 4)), 0);
    assert_eq!(Tiles::count_for(PixelRect::sized(3, 2), TileSize::new(0, 0)), 6);
    assert_eq!(viewport(3, 2).tiles(TileSize::new(0, 0)).count(), 6);

    let empty = CameraViewport::new(
        identity_like_view(),
        Matrix4::identity(),
        PixelRect::sized(0, 0),
    );
    let mut framebuffer = ImageFramebuffer::new(1, 1);
    let drawn = draw_in_subdivisions(&mut framebuffer, TileSize::default(), &empty, |_, _| {
        Ok(())
    })
    .expect("nothing to draw");
    assert_eq!(drawn, 0);
    assert_eq!(framebuffer.flushes, 0);
}
