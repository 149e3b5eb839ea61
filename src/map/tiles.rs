use std::{
    io::Read as _,
    time::{Duration, Instant},
};

use crate::foundation::error::{RideviewError, RideviewResult};

pub const DEFAULT_TILE_URL: &str = "https://a.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_USER_AGENT: &str = "Rideview GPX Tool 1.0";

/// Largest tile body accepted from the network.
const MAX_TILE_BYTES: u64 = 8 * 1024 * 1024;

/// Slippy-map tile address at a fixed zoom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoordinate {
    pub x: i64,
    pub y: i64,
}

impl TileCoordinate {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Supplier of encoded tile images (PNG/JPEG bytes).
///
/// An `Err` means the tile is unavailable; the mosaic keeps its background there.
pub trait TileSource {
    fn fetch(&mut self, zoom: u8, tile: TileCoordinate) -> RideviewResult<Vec<u8>>;
}

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Sleep until at least `interval` has passed since the previous call.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Tile server reached over HTTP, paced so the server is not hammered.
pub struct HttpTileSource {
    agent: ureq::Agent,
    url_template: String,
    user_agent: String,
    pacer: Pacer,
}

impl HttpTileSource {
    pub fn new(
        url_template: impl Into<String>,
        user_agent: impl Into<String>,
        pace: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            url_template: url_template.into(),
            user_agent: user_agent.into(),
            pacer: Pacer::new(pace),
        }
    }

    pub fn openstreetmap() -> Self {
        Self::new(DEFAULT_TILE_URL, DEFAULT_USER_AGENT, Duration::from_millis(100))
    }

    pub fn tile_url(&self, zoom: u8, tile: TileCoordinate) -> String {
        tile_url(&self.url_template, zoom, tile)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&mut self, zoom: u8, tile: TileCoordinate) -> RideviewResult<Vec<u8>> {
        let url = self.tile_url(zoom, tile);
        self.pacer.wait();

        let resp = self
            .agent
            .get(&url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| RideviewError::network(format!("GET {url}: {e}")))?;

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_TILE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| RideviewError::network(format!("reading {url}: {e}")))?;
        Ok(bytes)
    }
}

/// Expand `{z}`, `{x}` and `{y}` in a tile URL template.
pub fn tile_url(template: &str, zoom: u8, tile: TileCoordinate) -> String {
    template
        .replace("{z}", &zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_template_expansion() {
        assert_eq!(
            tile_url(DEFAULT_TILE_URL, 15, TileCoordinate::new(17220, 11727)),
            "https://a.tile.openstreetmap.org/15/17220/11727.png"
        );
    }

    #[test]
    fn coordinates_order_by_x_then_y() {
        let mut v = vec![
            TileCoordinate::new(2, 1),
            TileCoordinate::new(1, 5),
            TileCoordinate::new(1, 2),
        ];
        v.sort();
        assert_eq!(
            v,
            vec![
                TileCoordinate::new(1, 2),
                TileCoordinate::new(1, 5),
                TileCoordinate::new(2, 1)
            ]
        );
    }

    #[test]
    fn pacer_spaces_calls() {
        let mut pacer = Pacer::new(Duration::from_millis(20));
        let start = Instant::now();
        pacer.wait();
        pacer.wait();
        pacer.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
