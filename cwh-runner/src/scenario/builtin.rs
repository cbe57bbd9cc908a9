//! Built-in content-workaround matrix
//!
//! AC-3 playback (exercises the fake-EC-3 codec workaround where the platform
//! needs it) followed by mixed clear/encrypted playback for each supported key
//! system.

use super::skip::{excluded_device, excluded_in_vm};
use super::{Scenario, ScenarioMatrix};
use crate::error::Result;
use crate::player::LoadMode;
use std::path::PathBuf;
use std::time::Duration;

pub const WIDEVINE: &str = "com.widevine.alpha";
pub const PLAYREADY: &str = "com.microsoft.playready";
pub const FAIRPLAY: &str = "com.apple.fps";

pub const AC3_MIME_TYPE: &str = "audio/mp4; codecs=\"ac-3\"";

const WIDEVINE_SERVER: &str = "https://cwip-shaka-proxy.appspot.com/no_auth";
const PLAYREADY_SERVER: &str = "http://test.playready.microsoft.com/service/rightsmanager.asmx?cfg=(kid:51745386-2d42-56fd-8bad-4f58422004d7,contentkey:UXRThi1CVv2LrU9YQiAE1w==),(kid:26470f42-96d4-5d04-a9ba-bb442e169800,contentkey:JkcPQpbUXQSpurtELhaYAA==)";
const FAIRPLAY_SERVER: &str = "https://fps.ezdrm.com/api/licenses/b99ed9e5-c641-49d1-bfa8-43692b686ddb";

/// Asset paths relative to the asset root
pub mod assets {
    pub const AC3_DASH: &str = "dash-audio-ac3/dash.mpd";
    pub const CLEAR_ENCRYPTED_DASH: &str = "clear-encrypted/manifest.mpd";
    pub const CLEAR_ENCRYPTED_HLS: &str = "clear-encrypted-hls/manifest.m3u8";
    pub const FAIRPLAY_CERTIFICATE: &str = "clear-encrypted-hls/certificate.cer";
}

/// Key systems exercised by the mixed clear/encrypted scenarios, in run order
pub const KEY_SYSTEMS: [(&str, &str); 3] = [
    (WIDEVINE, WIDEVINE_SERVER),
    (PLAYREADY, PLAYREADY_SERVER),
    (FAIRPLAY, FAIRPLAY_SERVER),
];

fn asset(asset_root: &str, relative: &str) -> String {
    format!("{}/{}", asset_root.trim_end_matches('/'), relative)
}

/// Scenario id for the mixed clear/encrypted case of one key system
pub fn mixed_content_id(key_system: &str) -> String {
    format!("plays mixed clear encrypted content with {key_system}")
}

pub const AC3_SCENARIO_ID: &str = "supports AC-3 if platform supports it";

/// Build the matrix against assets under `asset_root`
pub fn content_workarounds_matrix(asset_root: &str) -> Result<ScenarioMatrix> {
    let mut matrix = ScenarioMatrix::new();

    matrix.insert(
        Scenario::builder(AC3_SCENARIO_ID, asset(asset_root, assets::AC3_DASH))
            .require_mime_type(AC3_MIME_TYPE)
            .expect_live(false)
            .movement_timeout(Duration::from_secs(10))
            .play_for(5.0, Duration::from_secs(30))
            .build(),
    )?;

    for (key_system, server) in KEY_SYSTEMS {
        let is_fairplay = key_system == FAIRPLAY;
        let content = if is_fairplay {
            asset(asset_root, assets::CLEAR_ENCRYPTED_HLS)
        } else {
            asset(asset_root, assets::CLEAR_ENCRYPTED_DASH)
        };

        let mut builder = Scenario::builder(mixed_content_id(key_system), content)
            .key_system(key_system)
            .skip_if(excluded_device(
                "Tizen",
                Some(3),
                "Tizen 3 currently does not support mixed clear encrypted content",
            ))
            .license_server(key_system, server)
            .expect_load_mode(LoadMode::MediaSource)
            .movement_timeout(Duration::from_secs(10))
            .play_for(10.0, Duration::from_secs(30))
            .require_key_status_change();

        if is_fairplay {
            builder = builder
                .skip_if(excluded_in_vm("FairPlay is not supported in a VM"))
                .server_certificate(PathBuf::from(asset(asset_root, assets::FAIRPLAY_CERTIFICATE)));
        }
        matrix.insert(builder.build())?;
    }

    Ok(matrix)
}
