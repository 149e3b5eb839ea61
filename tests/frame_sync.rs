use std::io::Cursor;

use image::{Rgb, RgbImage};

use rideview::{
    Painter, RideviewError, RideviewResult, Size, TileCoordinate, TileSource, Track, build_mosaic,
    map::MapFrameSynth, parse_blob, plan_tiles,
};

/// Every tile is a solid light square; counts requests.
struct FlatTiles {
    requests: usize,
}

impl TileSource for FlatTiles {
    fn fetch(&mut self, _zoom: u8, tile: TileCoordinate) -> RideviewResult<Vec<u8>> {
        self.requests += 1;
        if tile.x < 0 || tile.y < 0 {
            return Err(RideviewError::network("out of range"));
        }
        let img = RgbImage::from_pixel(256, 256, Rgb([230, 230, 230]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Ok(buf)
    }
}

fn painter() -> Painter {
    Painter::with_fontdb(usvg::fontdb::Database::new())
}

fn record(time: &str, lat: f64, lon: f64) -> String {
    format!(
        "Viidure2024/05/17 {time} N:{lat:.6} E:{lon:.6} 23.4 km/h 0.9 48.0 9 x:0.01 y:-0.02 z:0.98"
    )
}

#[test]
fn telemetry_blob_to_gap_free_map_frames() {
    let blob = [
        record("08:21:00", 45.4642, 9.19),
        record("08:21:01", 45.4643, 9.19),
        "Viidure2024/05/17 08:21:02 N:45.4 E:9.1 12".to_string(),
        record("08:21:04", 45.4645, 9.1901),
    ]
    .join("\0");

    let samples = parse_blob("seg_F.ts", blob.as_bytes());
    assert_eq!(samples.len(), 3);
    let track = Track::from_samples(samples);

    let viewport = Size::new(96, 128);
    let plan = plan_tiles(track.samples(), viewport, 15, 256);
    let mut tiles = FlatTiles { requests: 0 };
    let mosaic = build_mosaic(&plan, 15, 256, &mut tiles).unwrap();
    assert_eq!(tiles.requests, plan.len());

    let p = painter();
    let synth = MapFrameSynth::new(&mosaic, &p, viewport).unwrap();
    let frames = synth.synthesize(track.source("seg_F.ts")).unwrap();

    // 08:21:00 .. 08:21:04 inclusive
    assert_eq!(frames.len(), 5);
    for pair in frames.windows(2) {
        assert_eq!((pair[1].timestamp - pair[0].timestamp).num_seconds(), 1);
    }
    assert!(frames.iter().all(|f| f.image.dimensions() == (96, 128)));
    // the duplicate for 08:21:02 repeats the 08:21:01 frame
    assert_eq!(frames[2].image, frames[1].image);
    assert_eq!(frames[1].image.get_pixel(2, 2).0, [230, 230, 230, 255]);
}

#[test]
fn single_sample_without_fix_gives_one_placeholder() {
    let blob = record("08:21:00", 0.0, 0.0);
    let track = Track::from_samples(parse_blob("seg_F.ts", blob.as_bytes()));
    assert_eq!(track.len(), 1);

    let viewport = Size::new(48, 64);
    let plan = plan_tiles(track.samples(), viewport, 15, 256);
    assert!(plan.is_empty());

    let mut tiles = FlatTiles { requests: 0 };
    let mosaic = build_mosaic(&plan, 15, 256, &mut tiles).unwrap();
    assert_eq!(tiles.requests, 0);
    assert!(mosaic.is_empty());

    let p = painter();
    let synth = MapFrameSynth::new(&mosaic, &p, viewport).unwrap();
    let frames = synth.synthesize(track.source("seg_F.ts")).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].timestamp, track.source("seg_F.ts")[0].timestamp);
    assert_eq!(frames[0].image.get_pixel(0, 0).0, [45, 45, 45, 255]);
}

#[test]
fn unknown_source_gives_one_placeholder() {
    let p = painter();
    let mosaic = rideview::Mosaic::empty(15, 256);
    let synth = MapFrameSynth::new(&mosaic, &p, Size::new(48, 64)).unwrap();
    let track = Track::new();
    let frames = synth.synthesize(track.source("missing_F.ts")).unwrap();
    assert_eq!(frames.len(), 1);
}
