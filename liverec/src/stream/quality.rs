use api::stream::QualityProfile;

fn builtin(
    id: &str,
    width: u32,
    height: u32,
    fps: u32,
    bitrate_kbps: u32,
    preset: &str,
) -> QualityProfile {
    QualityProfile {
        id: id.to_string(),
        width,
        height,
        fps,
        bitrate_kbps,
        preset: preset.to_string(),
    }
}

pub fn builtins() -> Vec<QualityProfile> {
    vec![
        builtin("mobile", 426, 240, 15, 300, "ultrafast"),
        builtin("low", 640, 360, 20, 600, "veryfast"),
        builtin("medium", 1280, 720, 25, 1500, "veryfast"),
        builtin("high", 1920, 1080, 30, 3000, "faster"),
        builtin("ultra", 2560, 1440, 30, 6000, "fast"),
    ]
}

/// Built-in profiles with `extra` merged in by id
pub fn profiles(extra: &[QualityProfile]) -> Vec<QualityProfile> {
    let mut all = builtins();
    for profile in extra {
        match all.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile.clone(),
            None => all.push(profile.clone()),
        }
    }
    all
}

pub fn find<'a>(profiles: &'a [QualityProfile], id: &str) -> Option<&'a QualityProfile> {
    profiles.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}
