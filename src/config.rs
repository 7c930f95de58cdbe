use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::{self, Deserializer, Visitor};

use crate::processing::layout::WindowGeometry;
use crate::processing::peekaboo::DEFAULT_BIN_COUNT;
use crate::tasks::files::DEFAULT_EXTENSIONS;

/// How the slideshow maps onto the attached monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// One borderless fullscreen window per monitor.
    #[default]
    Fullscreen,
    /// One borderless window across the whole virtual desktop; every monitor
    /// is its own surface inside it.
    Span,
    /// A single ordinary window.
    Windowed,
}

impl DisplayMode {
    /// Screensaver-style modes exit on any key press.
    pub fn is_screensaver(self) -> bool {
        !matches!(self, Self::Windowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvanceMode {
    /// Every surface shows a new image on each tick.
    #[default]
    All,
    /// One surface per tick, cycling through all of them.
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AnimationOptions {
    /// Length of the crossfade.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Crossfade frames per second.
    pub fps: u32,
    /// Opacity of the overlay that darkens earlier images.
    pub darken: f32,
}

impl Default for AnimationOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(1000),
            fps: 30,
            darken: 0.6,
        }
    }
}

impl AnimationOptions {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WindowOptions {
    /// `WxH+X+Y` for windowed mode.
    #[serde(deserialize_with = "deserialize_geometry")]
    pub geometry: WindowGeometry,
    pub borderless: bool,
    /// `0` is opaque, `255` fully transparent.
    pub transparency: u8,
    /// Let mouse input pass through to whatever is below the window.
    pub click_through: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            geometry: WindowGeometry::default(),
            borderless: false,
            transparency: 0,
            click_through: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Image folders, as a list or one newline-delimited string.
    #[serde(deserialize_with = "deserialize_folders")]
    pub folders: Vec<PathBuf>,
    /// Time between image changes. A bare number is read as seconds.
    #[serde(deserialize_with = "deserialize_interval")]
    pub interval: Duration,
    pub shuffle: bool,
    /// Descend into sub-folders while scanning.
    pub recursive: bool,
    /// File extensions to show, without the dot. Defaults depend on the
    /// display mode.
    pub extensions: Option<Vec<String>>,
    /// Seed for playlist shuffling and placement; random when absent.
    pub seed: Option<u64>,
    pub display: DisplayMode,
    pub advance: AdvanceMode,
    pub animation: AnimationOptions,
    /// Bins per axis in the placement histograms.
    pub placement_bins: usize,
    pub window: WindowOptions,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            interval: Duration::from_secs(10),
            shuffle: true,
            recursive: false,
            extensions: None,
            seed: None,
            display: DisplayMode::default(),
            advance: AdvanceMode::default(),
            animation: AnimationOptions::default(),
            placement_bins: DEFAULT_BIN_COUNT,
            window: WindowOptions::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub folders: Vec<PathBuf>,
    pub recursive: bool,
    pub shuffle: Option<bool>,
    pub interval: Option<Duration>,
    pub geometry: Option<WindowGeometry>,
    pub borderless: bool,
    pub extensions: Option<Vec<String>>,
    pub display: Option<DisplayMode>,
    pub seed: Option<u64>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if !overrides.folders.is_empty() {
            self.folders = overrides.folders;
        }
        self.recursive |= overrides.recursive;
        if let Some(shuffle) = overrides.shuffle {
            self.shuffle = shuffle;
        }
        if let Some(interval) = overrides.interval {
            self.interval = interval;
        }
        if let Some(geometry) = overrides.geometry {
            self.window.geometry = geometry;
            // A geometry only means something for a plain window.
            if overrides.display.is_none() {
                self.display = DisplayMode::Windowed;
            }
        }
        self.window.borderless |= overrides.borderless;
        if overrides.extensions.is_some() {
            self.extensions = overrides.extensions;
        }
        if let Some(display) = overrides.display {
            self.display = display;
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
        self
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            !self.folders.is_empty(),
            "at least one image folder is required"
        );
        ensure!(!self.interval.is_zero(), "interval must be greater than zero");
        ensure!(
            (1..=240).contains(&self.animation.fps),
            "animation.fps must be between 1 and 240"
        );
        ensure!(
            (0.0..=1.0).contains(&self.animation.darken),
            "animation.darken must be between 0 and 1"
        );
        ensure!(
            self.placement_bins > 0,
            "placement-bins must be greater than zero"
        );
        if let Some(extensions) = self.extensions.as_mut() {
            for ext in extensions.iter_mut() {
                *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            }
            extensions.retain(|ext| !ext.is_empty());
            ensure!(
                !extensions.is_empty(),
                "extensions must include at least one entry"
            );
        }
        Ok(self)
    }

    /// Extensions to scan for. Windowed mode also picks up WebP by default.
    pub fn extensions(&self) -> Vec<String> {
        if let Some(extensions) = self.extensions.as_ref() {
            return extensions.clone();
        }
        let mut extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        if self.display == DisplayMode::Windowed {
            extensions.push("webp".to_string());
        }
        extensions
    }

    /// Opacity for the render target; only windowed mode is translucent.
    pub fn window_alpha(&self) -> u8 {
        match self.display {
            DisplayMode::Windowed => 255 - self.window.transparency,
            _ => 255,
        }
    }
}

fn deserialize_folders<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FoldersVisitor;

    impl<'de> Visitor<'de> for FoldersVisitor {
        type Value = Vec<PathBuf>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a list of folders or a newline-delimited string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut folders = Vec::new();
            while let Some(folder) = seq.next_element::<PathBuf>()? {
                folders.push(folder);
            }
            Ok(folders)
        }
    }

    deserializer.deserialize_any(FoldersVisitor)
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct IntervalVisitor;

    impl<'de> Visitor<'de> for IntervalVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a number of seconds or a duration such as \"10s\"")
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Duration::try_from_secs_f64(value)
                .map_err(|_| E::invalid_value(de::Unexpected::Float(value), &self))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(value.trim()).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(IntervalVisitor)
}

fn deserialize_geometry<'de, D>(deserializer: D) -> Result<WindowGeometry, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    WindowGeometry::parse(&raw).map_err(|err| de::Error::custom(format!("{err:#}")))
}
