pub mod gauge;
pub mod places;

pub use gauge::{GAUGE_MAX, PanelData, PanelStyle, render_panel};
pub use places::{
    Geocoder, NominatimGeocoder, PlaceNames, RateGate, UNKNOWN_PLACE, render_overlay_frames,
};
