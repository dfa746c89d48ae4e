//! Platform input devices for the ffmpeg capture backend
//!
//! Maps source ids and device ids onto ffmpeg input arguments
//! (`x11grab`/`pulse`/`v4l2` on Linux, `gdigrab`/`dshow` on Windows,
//! `avfoundation` on macOS) and parses the device listings those inputs print.

use super::traits::{AudioDeviceInfo, CameraInfo, CaptureError, CaptureResult, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Whether system audio can be captured next to the screen
    pub fn supports_system_audio(self) -> bool {
        !matches!(self, Platform::MacOs)
    }
}

/// Parsed `screen:<n>` / `window:<id>` source id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceId {
    Screen(u32),
    Window(String),
}

impl SourceId {
    pub fn parse(id: &str) -> CaptureResult<Self> {
        let (kind, rest) = id
            .split_once(':')
            .ok_or_else(|| CaptureError::InvalidSource(id.to_string()))?;

        match kind {
            "screen" => rest
                .parse()
                .map(SourceId::Screen)
                .map_err(|_| CaptureError::InvalidSource(id.to_string())),
            "window" if !rest.is_empty() => Ok(SourceId::Window(rest.to_string())),
            _ => Err(CaptureError::InvalidSource(id.to_string())),
        }
    }
}

/// One device from an avfoundation or dshow listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Value passed back to ffmpeg: an index for avfoundation, the name for dshow
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    pub video: Vec<DeviceEntry>,
    pub audio: Vec<DeviceEntry>,
}

/// Monitor reported by `xrandr --listmonitors`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub index: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
    pub primary: bool,
}

/// Strip the `[avfoundation indev @ 0x..] ` style prefix ffmpeg puts on log lines
fn strip_log_prefix(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('[') {
        if let Some(end) = line.find("] ") {
            return line[end + 2..].trim();
        }
    }
    line
}

/// Parse `ffmpeg -f avfoundation -list_devices true -i ""` stderr
pub fn parse_avfoundation_devices(output: &str) -> DeviceList {
    let mut list = DeviceList::default();
    let mut in_audio = None;

    for line in output.lines() {
        let text = strip_log_prefix(line);
        if text.contains("video devices:") {
            in_audio = Some(false);
            continue;
        }
        if text.contains("audio devices:") {
            in_audio = Some(true);
            continue;
        }

        let Some(audio) = in_audio else { continue };
        let Some(rest) = text.strip_prefix('[') else { continue };
        let Some((index, name)) = rest.split_once("] ") else { continue };
        if index.parse::<u32>().is_err() {
            continue;
        }

        let entry = DeviceEntry {
            id: index.to_string(),
            name: name.trim().to_string(),
        };
        if audio {
            list.audio.push(entry);
        } else {
            list.video.push(entry);
        }
    }

    list
}

/// Parse `ffmpeg -f dshow -list_devices true -i dummy` stderr.
/// Understands both the sectioned layout and the newer `"name" (audio)` layout.
pub fn parse_dshow_devices(output: &str) -> DeviceList {
    let mut list = DeviceList::default();
    let mut in_audio = None;

    for line in output.lines() {
        let text = strip_log_prefix(line);
        if text.starts_with("DirectShow video devices") {
            in_audio = Some(false);
            continue;
        }
        if text.starts_with("DirectShow audio devices") {
            in_audio = Some(true);
            continue;
        }
        if text.starts_with("Alternative name") || !text.starts_with('"') {
            continue;
        }

        let Some(end) = text[1..].find('"') else { continue };
        let name = text[1..end + 1].to_string();
        let tail = text[end + 2..].trim();

        let audio = match tail {
            "(audio)" => true,
            "(video)" => false,
            "(audio, video)" | "(video, audio)" => false,
            _ => match in_audio {
                Some(audio) => audio,
                None => continue,
            },
        };

        let entry = DeviceEntry {
            id: name.clone(),
            name,
        };
        if audio {
            list.audio.push(entry);
        } else {
            list.video.push(entry);
        }
    }

    list
}

/// Parse `xrandr --listmonitors` stdout
pub fn parse_xrandr_monitors(output: &str) -> Vec<Monitor> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (index, rest) = line.split_once(": ")?;
            let index = index.parse().ok()?;
            let mut parts = rest.split_whitespace();
            let flags_name = parts.next()?;
            let geometry = parts.next()?;

            let primary = flags_name.contains('*');
            let name = flags_name.trim_start_matches(['+', '*']).to_string();

            // 1920/344x1080/193+0+0
            let (size, offset) = geometry.split_once('+')?;
            let (w, h) = size.split_once('x')?;
            let width = w.split('/').next()?.parse().ok()?;
            let height = h.split('/').next()?.parse().ok()?;
            let (x, y) = offset.split_once('+')?;

            Some(Monitor {
                index,
                name,
                width,
                height,
                x: x.parse().ok()?,
                y: y.parse().ok()?,
                primary,
            })
        })
        .collect()
}

/// Parse `pactl list short sources` stdout into input devices.
/// Monitor sources are loopbacks of outputs, not microphones.
pub fn parse_pactl_sources(output: &str) -> Vec<AudioDeviceInfo> {
    let inputs: Vec<&str> = output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .filter(|name| !name.ends_with(".monitor"))
        .collect();

    inputs
        .iter()
        .enumerate()
        .map(|(i, name)| AudioDeviceInfo {
            id: name.to_string(),
            name: name.to_string(),
            is_input: true,
            is_default: i == 0,
        })
        .collect()
}

/// Screen sources offered by avfoundation, `Capture screen <n>`
pub fn avfoundation_screens(devices: &DeviceList) -> Vec<(u32, &DeviceEntry)> {
    devices
        .video
        .iter()
        .filter_map(|d| {
            d.name
                .strip_prefix("Capture screen ")
                .and_then(|n| n.trim().parse().ok())
                .map(|n| (n, d))
        })
        .collect()
}

fn avfoundation_cameras(devices: &DeviceList) -> impl Iterator<Item = &DeviceEntry> {
    devices
        .video
        .iter()
        .filter(|d| !d.name.starts_with("Capture screen"))
}

const WINDOWS_LOOPBACK_DEVICES: [&str; 2] = ["virtual-audio-capturer", "Stereo Mix"];

fn framerate(fps: u32) -> [String; 2] {
    ["-framerate".to_string(), fps.max(1).to_string()]
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Input arguments for a screen or window
pub fn screen_input(
    platform: Platform,
    source: &SourceId,
    fps: u32,
    monitors: &[Monitor],
    devices: &DeviceList,
) -> CaptureResult<Vec<String>> {
    let mut input = Vec::new();

    match (platform, source) {
        (Platform::Linux, SourceId::Screen(n)) => {
            let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
            input.extend(args(&["-f", "x11grab"]));
            input.extend(framerate(fps));
            match monitors.iter().find(|m| m.index == *n) {
                Some(m) => {
                    input.extend(args(&["-video_size", &format!("{}x{}", m.width, m.height)]));
                    input.extend(args(&["-i", &format!("{}+{},{}", display, m.x, m.y)]));
                }
                None if *n == 0 => input.extend(args(&["-i", &display])),
                None => return Err(CaptureError::DeviceUnavailable(format!("screen {}", n))),
            }
        }
        (Platform::Linux, SourceId::Window(id)) => {
            let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
            input.extend(args(&["-f", "x11grab"]));
            input.extend(framerate(fps));
            input.extend(args(&["-window_id", id, "-i", &display]));
        }
        (Platform::Windows, SourceId::Screen(_)) => {
            input.extend(args(&["-f", "gdigrab"]));
            input.extend(framerate(fps));
            input.extend(args(&["-draw_mouse", "1", "-i", "desktop"]));
        }
        (Platform::Windows, SourceId::Window(title)) => {
            input.extend(args(&["-f", "gdigrab"]));
            input.extend(framerate(fps));
            input.extend(args(&["-i", &format!("title={}", title)]));
        }
        (Platform::MacOs, SourceId::Screen(n)) => {
            let (_, device) = avfoundation_screens(devices)
                .into_iter()
                .find(|(screen, _)| screen == n)
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("screen {}", n)))?;
            input.extend(args(&["-f", "avfoundation", "-capture_cursor", "1"]));
            input.extend(framerate(fps));
            input.extend(args(&["-i", &format!("{}:none", device.id)]));
        }
        (Platform::MacOs, SourceId::Window(_)) => {
            return Err(CaptureError::CaptureUnsupported(
                "window capture is not available through avfoundation".into(),
            ));
        }
    }

    Ok(input)
}

/// Input arguments for the loopback of what the system is playing.
/// `device` names a loopback device chosen by the user, `None` picks one.
pub fn system_audio_input(
    platform: Platform,
    device: Option<&str>,
    devices: &DeviceList,
) -> CaptureResult<Vec<String>> {
    match (platform, device) {
        (Platform::Linux, device) => Ok(args(&[
            "-f",
            "pulse",
            "-i",
            device.unwrap_or("@DEFAULT_MONITOR@"),
        ])),
        (Platform::Windows, Some(name)) => Ok(args(&["-f", "dshow", "-i", &format!("audio={}", name)])),
        (Platform::MacOs, Some(name)) => Ok(args(&["-f", "avfoundation", "-i", &format!(":{}", name)])),
        (Platform::Windows, None) => devices
            .audio
            .iter()
            .find(|d| WINDOWS_LOOPBACK_DEVICES.iter().any(|l| d.name.contains(l)))
            .map(|d| args(&["-f", "dshow", "-i", &format!("audio={}", d.id)]))
            .ok_or_else(|| {
                CaptureError::CaptureUnsupported("no loopback audio device installed".into())
            }),
        (Platform::MacOs, None) => Err(CaptureError::CaptureUnsupported(
            "macOS has no loopback audio device".into(),
        )),
    }
}

/// Input arguments for a microphone, `None` selecting the default input
pub fn microphone_input(
    platform: Platform,
    device: Option<&str>,
    devices: &DeviceList,
) -> CaptureResult<Vec<String>> {
    match platform {
        Platform::Linux => Ok(args(&["-f", "pulse", "-i", device.unwrap_or("default")])),
        Platform::Windows => {
            let name = match device {
                Some(name) => name.to_string(),
                None => devices
                    .audio
                    .iter()
                    .find(|d| !WINDOWS_LOOPBACK_DEVICES.iter().any(|l| d.name.contains(l)))
                    .map(|d| d.id.clone())
                    .ok_or_else(|| CaptureError::DeviceUnavailable("microphone".into()))?,
            };
            Ok(args(&["-f", "dshow", "-i", &format!("audio={}", name)]))
        }
        Platform::MacOs => Ok(args(&[
            "-f",
            "avfoundation",
            "-i",
            &format!(":{}", device.unwrap_or("default")),
        ])),
    }
}

/// Input arguments for a webcam, `None` selecting the first camera
pub fn webcam_input(
    platform: Platform,
    device: Option<&str>,
    fps: u32,
    devices: &DeviceList,
) -> CaptureResult<Vec<String>> {
    let mut input = Vec::new();

    match platform {
        Platform::Linux => {
            input.extend(args(&["-f", "v4l2"]));
            input.extend(framerate(fps));
            input.extend(args(&["-i", device.unwrap_or("/dev/video0")]));
        }
        Platform::Windows => {
            let name = match device {
                Some(name) => name.to_string(),
                None => devices
                    .video
                    .first()
                    .map(|d| d.id.clone())
                    .ok_or_else(|| CaptureError::DeviceUnavailable("webcam".into()))?,
            };
            input.extend(args(&["-f", "dshow"]));
            input.extend(framerate(fps));
            input.extend(args(&["-i", &format!("video={}", name)]));
        }
        Platform::MacOs => {
            let index = match device {
                Some(index) => index.to_string(),
                None => avfoundation_cameras(devices)
                    .next()
                    .map(|d| d.id.clone())
                    .ok_or_else(|| CaptureError::DeviceUnavailable("webcam".into()))?,
            };
            input.extend(args(&["-f", "avfoundation"]));
            input.extend(framerate(fps));
            input.extend(args(&["-i", &format!("{}:none", index)]));
        }
    }

    Ok(input)
}

/// Cameras from a device listing
pub fn cameras_from(platform: Platform, devices: &DeviceList) -> Vec<CameraInfo> {
    let entries: Vec<&DeviceEntry> = match platform {
        Platform::MacOs => avfoundation_cameras(devices).collect(),
        _ => devices.video.iter().collect(),
    };

    entries
        .into_iter()
        .map(|d| CameraInfo {
            id: d.id.clone(),
            name: d.name.clone(),
            supported_resolutions: vec![Resolution::new(1280, 720), Resolution::new(640, 480)],
        })
        .collect()
}

/// Microphones from a device listing
pub fn microphones_from(devices: &DeviceList) -> Vec<AudioDeviceInfo> {
    devices
        .audio
        .iter()
        .filter(|d| !WINDOWS_LOOPBACK_DEVICES.iter().any(|l| d.name.contains(l)))
        .enumerate()
        .map(|(i, d)| AudioDeviceInfo {
            id: d.id.clone(),
            name: d.name.clone(),
            is_input: true,
            is_default: i == 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVFOUNDATION: &str = "\
[AVFoundation indev @ 0x7f9] AVFoundation video devices:
[AVFoundation indev @ 0x7f9] [0] FaceTime HD Camera
[AVFoundation indev @ 0x7f9] [1] Capture screen 0
[AVFoundation indev @ 0x7f9] [2] Capture screen 1
[AVFoundation indev @ 0x7f9] AVFoundation audio devices:
[AVFoundation indev @ 0x7f9] [0] MacBook Pro Microphone
: Input/output error";

    const DSHOW_NEW: &str = "\
[dshow @ 000001] \"Integrated Camera\" (video)
[dshow @ 000001]   Alternative name \"@device_pnp_\\\\?\\usb\"
[dshow @ 000001] \"Microphone Array (Realtek)\" (audio)
[dshow @ 000001] \"virtual-audio-capturer\" (audio)";

    const DSHOW_OLD: &str = "\
[dshow @ 02] DirectShow video devices (some may be both video and audio devices)
[dshow @ 02]  \"USB Camera\"
[dshow @ 02]     Alternative name \"@device_pnp_x\"
[dshow @ 02] DirectShow audio devices
[dshow @ 02]  \"Stereo Mix (Realtek Audio)\"
[dshow @ 02]  \"Headset Mic\"";

    #[test]
    fn test_parse_source_id() {
        assert_eq!(SourceId::parse("screen:1").unwrap(), SourceId::Screen(1));
        assert_eq!(
            SourceId::parse("window:0x3a00007").unwrap(),
            SourceId::Window("0x3a00007".into())
        );
        assert!(SourceId::parse("screen:abc").is_err());
        assert!(SourceId::parse("window:").is_err());
        assert!(SourceId::parse("camera").is_err());
    }

    #[test]
    fn test_parse_avfoundation() {
        let list = parse_avfoundation_devices(AVFOUNDATION);
        assert_eq!(list.video.len(), 3);
        assert_eq!(list.audio.len(), 1);
        assert_eq!(list.audio[0].name, "MacBook Pro Microphone");

        let screens = avfoundation_screens(&list);
        assert_eq!(screens.len(), 2);
        assert_eq!(screens[1].0, 1);
        assert_eq!(screens[1].1.id, "2");

        let cams = cameras_from(Platform::MacOs, &list);
        assert_eq!(cams.len(), 1);
        assert_eq!(cams[0].name, "FaceTime HD Camera");
    }

    #[test]
    fn test_parse_dshow_both_layouts() {
        let new = parse_dshow_devices(DSHOW_NEW);
        assert_eq!(new.video, vec![DeviceEntry { id: "Integrated Camera".into(), name: "Integrated Camera".into() }]);
        assert_eq!(new.audio.len(), 2);

        let old = parse_dshow_devices(DSHOW_OLD);
        assert_eq!(old.video.len(), 1);
        assert_eq!(old.audio.len(), 2);
        assert_eq!(old.audio[1].name, "Headset Mic");

        let mics = microphones_from(&old);
        assert_eq!(mics.len(), 1);
        assert_eq!(mics[0].name, "Headset Mic");
    }

    #[test]
    fn test_parse_xrandr() {
        let monitors = parse_xrandr_monitors(
            "Monitors: 2\n 0: +*eDP-1 1920/344x1080/193+0+0  eDP-1\n 1: +HDMI-1 2560/597x1440/336+1920+0  HDMI-1\n",
        );
        assert_eq!(monitors.len(), 2);
        assert!(monitors[0].primary);
        assert_eq!(monitors[1].name, "HDMI-1");
        assert_eq!((monitors[1].width, monitors[1].height), (2560, 1440));
        assert_eq!((monitors[1].x, monitors[1].y), (1920, 0));
    }

    #[test]
    fn test_parse_pactl_skips_monitors() {
        let devices = parse_pactl_sources(
            "0\talsa_output.pci.analog-stereo.monitor\tmodule-alsa-card.c\ts16le 2ch 48000Hz\tSUSPENDED\n\
             1\talsa_input.pci.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tRUNNING\n",
        );
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "alsa_input.pci.analog-stereo");
        assert!(devices[0].is_default);
    }

    #[test]
    fn test_system_audio_per_platform() {
        assert!(system_audio_input(Platform::Linux, None, &DeviceList::default()).is_ok());
        assert!(matches!(
            system_audio_input(Platform::MacOs, None, &DeviceList::default()),
            Err(CaptureError::CaptureUnsupported(_))
        ));
        assert!(matches!(
            system_audio_input(Platform::Windows, None, &DeviceList::default()),
            Err(CaptureError::CaptureUnsupported(_))
        ));

        let args = system_audio_input(Platform::Windows, None, &parse_dshow_devices(DSHOW_NEW)).unwrap();
        assert_eq!(args.last().unwrap(), "audio=virtual-audio-capturer");
    }

    #[test]
    fn test_system_audio_uses_chosen_device() {
        let args = system_audio_input(Platform::Linux, Some("alsa_output.monitor"), &DeviceList::default()).unwrap();
        assert_eq!(args.last().unwrap(), "alsa_output.monitor");

        let args = system_audio_input(Platform::MacOs, Some("BlackHole 2ch"), &DeviceList::default()).unwrap();
        assert_eq!(args, vec!["-f", "avfoundation", "-i", ":BlackHole 2ch"]);

        let args = system_audio_input(Platform::Windows, Some("Stereo Mix"), &DeviceList::default()).unwrap();
        assert_eq!(args.last().unwrap(), "audio=Stereo Mix");
    }

    #[test]
    fn test_screen_input_uses_monitor_geometry() {
        let monitors = parse_xrandr_monitors(" 1: +HDMI-1 2560/597x1440/336+1920+0  HDMI-1");
        let args = screen_input(
            Platform::Linux,
            &SourceId::Screen(1),
            30,
            &monitors,
            &DeviceList::default(),
        )
        .unwrap();
        assert!(args.windows(2).any(|w| w == ["-video_size", "2560x1440"]));
        assert!(args.last().unwrap().ends_with("+1920,0"));
    }

    #[test]
    fn test_macos_window_capture_unsupported() {
        let result = screen_input(
            Platform::MacOs,
            &SourceId::Window("42".into()),
            30,
            &[],
            &DeviceList::default(),
        );
        assert!(matches!(result, Err(CaptureError::CaptureUnsupported(_))));
    }
}
