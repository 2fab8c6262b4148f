//! Application-level configuration loading: phase timings, bot behaviour and the static pools.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::{RoundPhase, Track, VoterEligibility};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONG_WARS_CONFIG_PATH";

/// Duration of every phase of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Category reveal.
    pub category: Duration,
    /// Song submission window.
    pub submission: Duration,
    /// Playback time granted to each submitted song.
    pub playback_per_song: Duration,
    /// Voting window.
    pub voting: Duration,
    /// Results display.
    pub results: Duration,
}

impl PhaseTimings {
    /// Time the given phase lasts, playback being proportional to the submission count.
    pub fn duration(&self, phase: RoundPhase, submissions: usize) -> Duration {
        match phase {
            RoundPhase::Category => self.category,
            RoundPhase::Submission => self.submission,
            RoundPhase::Playback => self.playback_per_song * submissions as u32,
            RoundPhase::Voting => self.voting,
            RoundPhase::Results => self.results,
        }
    }
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            category: Duration::from_secs(10),
            submission: Duration::from_secs(20),
            playback_per_song: Duration::from_secs(10),
            voting: Duration::from_secs(15),
            results: Duration::from_secs(15),
        }
    }
}

/// Inclusive delay range from which bot reaction times are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    /// Shortest delay.
    pub min: Duration,
    /// Longest delay.
    pub max: Duration,
}

impl DelayRange {
    /// Build a range from millisecond bounds, swapping them if reversed.
    pub fn from_millis(min: u64, max: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }
}

/// Tunables of the bot simulator and the data it draws from.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Delay before the player who summoned the bots is marked ready.
    pub ready_delay: Duration,
    /// Reaction time before a bot submits a song.
    pub submit_delay: DelayRange,
    /// Reaction time before a bot votes.
    pub vote_delay: DelayRange,
    /// Size of each bot's song pool.
    pub songs_per_bot: usize,
    /// Names handed out to bots, in order.
    pub roster: Vec<String>,
    /// Songs bot pools are sampled from.
    pub catalog: Vec<Track>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            ready_delay: Duration::from_millis(1_000),
            submit_delay: DelayRange::from_millis(500, 2_500),
            vote_delay: DelayRange::from_millis(1_000, 5_000),
            songs_per_bot: 5,
            roster: default_roster(),
            catalog: default_catalog(),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Phase durations.
    pub timings: PhaseTimings,
    /// Bot simulator settings.
    pub bots: BotSettings,
    /// Category pool rooms draw their rounds from.
    pub categories: Vec<String>,
    /// Rule ending the voting phase early.
    pub voter_eligibility: VoterEligibility,
    /// Whether hosts may force the next phase (test mode).
    pub allow_manual_advance: bool,
    /// Idle time after which a room without connections is unloaded.
    pub abandon_after: Duration,
    /// Capacity of each room's command queue.
    pub mailbox_capacity: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        categories = app_config.categories.len(),
                        catalog = app_config.bots.catalog.len(),
                        "loaded game configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Highest round count a room can be created with.
    pub fn max_rounds(&self) -> u32 {
        self.categories.len() as u32
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timings: PhaseTimings::default(),
            bots: BotSettings::default(),
            categories: default_categories(),
            voter_eligibility: VoterEligibility::default(),
            allow_manual_advance: false,
            abandon_after: Duration::from_secs(10 * 60),
            mailbox_capacity: 64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file; every field is optional.
struct RawConfig {
    timings: RawTimings,
    bots: RawBots,
    categories: Option<Vec<String>>,
    voter_eligibility: Option<VoterEligibility>,
    allow_manual_advance: Option<bool>,
    abandon_after_secs: Option<u64>,
    mailbox_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTimings {
    category_ms: Option<u64>,
    submission_ms: Option<u64>,
    playback_per_song_ms: Option<u64>,
    voting_ms: Option<u64>,
    results_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBots {
    ready_delay_ms: Option<u64>,
    submit_delay_ms: Option<[u64; 2]>,
    vote_delay_ms: Option<[u64; 2]>,
    songs_per_bot: Option<usize>,
    roster: Option<Vec<String>>,
    catalog: Option<Vec<RawTrack>>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a catalog entry.
struct RawTrack {
    track_id: String,
    track_name: String,
    track_artist: String,
    #[serde(default)]
    track_image: Option<String>,
}

impl From<RawTrack> for Track {
    fn from(value: RawTrack) -> Self {
        Self {
            track_id: value.track_id,
            track_name: value.track_name,
            track_artist: value.track_artist,
            track_image: value.track_image,
        }
    }
}

impl From<RawTimings> for PhaseTimings {
    fn from(value: RawTimings) -> Self {
        let defaults = PhaseTimings::default();
        let ms = |raw: Option<u64>, fallback: Duration| raw.map_or(fallback, Duration::from_millis);
        Self {
            category: ms(value.category_ms, defaults.category),
            submission: ms(value.submission_ms, defaults.submission),
            playback_per_song: ms(value.playback_per_song_ms, defaults.playback_per_song),
            voting: ms(value.voting_ms, defaults.voting),
            results: ms(value.results_ms, defaults.results),
        }
    }
}

impl From<RawBots> for BotSettings {
    fn from(value: RawBots) -> Self {
        let defaults = BotSettings::default();
        let roster = value
            .roster
            .filter(|names| !names.is_empty())
            .unwrap_or(defaults.roster);
        let catalog = value
            .catalog
            .map(|tracks| tracks.into_iter().map(Into::into).collect::<Vec<Track>>())
            .filter(|tracks| !tracks.is_empty())
            .unwrap_or(defaults.catalog);

        Self {
            ready_delay: value
                .ready_delay_ms
                .map_or(defaults.ready_delay, Duration::from_millis),
            submit_delay: value
                .submit_delay_ms
                .map_or(defaults.submit_delay, |[min, max]| {
                    DelayRange::from_millis(min, max)
                }),
            vote_delay: value
                .vote_delay_ms
                .map_or(defaults.vote_delay, |[min, max]| {
                    DelayRange::from_millis(min, max)
                }),
            songs_per_bot: value
                .songs_per_bot
                .filter(|count| *count > 0)
                .unwrap_or(defaults.songs_per_bot),
            roster,
            catalog,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            timings: value.timings.into(),
            bots: value.bots.into(),
            categories: value
                .categories
                .filter(|categories| !categories.is_empty())
                .unwrap_or(defaults.categories),
            voter_eligibility: value
                .voter_eligibility
                .unwrap_or(defaults.voter_eligibility),
            allow_manual_advance: value
                .allow_manual_advance
                .unwrap_or(defaults.allow_manual_advance),
            abandon_after: value
                .abandon_after_secs
                .map_or(defaults.abandon_after, Duration::from_secs),
            mailbox_capacity: value
                .mailbox_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.mailbox_capacity),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in category prompts.
fn default_categories() -> Vec<String> {
    [
        "A song for a long road trip",
        "The first song you ever loved",
        "Guilty pleasure",
        "A song that makes you want to dance",
        "Perfect for a rainy day",
        "Best opening track of an album",
        "A song you know every word to",
        "Soundtrack of your summer",
        "A song that should be a movie",
        "Karaoke showstopper",
        "Best song to cook to",
        "A cover better than the original",
        "Something from your parents' record collection",
        "A song that instantly calms you down",
        "The ultimate breakup song",
        "Best song to start a party",
        "A one-hit wonder",
        "A song with an unforgettable music video",
        "Workout anthem",
        "A song you would play at 3am",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Built-in bot names.
fn default_roster() -> Vec<String> {
    [
        "DJ Botsworth",
        "Melody Machine",
        "Beat Bandit",
        "Synthia",
        "Vinyl Vic",
        "Bass Droid",
        "Echo",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Built-in catalog bot pools are sampled from.
fn default_catalog() -> Vec<Track> {
    [
        ("catalog-001", "Bohemian Rhapsody", "Queen"),
        ("catalog-002", "Billie Jean", "Michael Jackson"),
        ("catalog-003", "Smells Like Teen Spirit", "Nirvana"),
        ("catalog-004", "Hey Ya!", "OutKast"),
        ("catalog-005", "Rolling in the Deep", "Adele"),
        ("catalog-006", "Mr. Brightside", "The Killers"),
        ("catalog-007", "Dancing Queen", "ABBA"),
        ("catalog-008", "Superstition", "Stevie Wonder"),
        ("catalog-009", "Seven Nation Army", "The White Stripes"),
        ("catalog-010", "Blinding Lights", "The Weeknd"),
        ("catalog-011", "Wonderwall", "Oasis"),
        ("catalog-012", "Bad Guy", "Billie Eilish"),
        ("catalog-013", "Take On Me", "a-ha"),
        ("catalog-014", "Hotel California", "Eagles"),
        ("catalog-015", "Uptown Funk", "Mark Ronson"),
        ("catalog-016", "Africa", "Toto"),
        ("catalog-017", "Levitating", "Dua Lipa"),
        ("catalog-018", "September", "Earth, Wind & Fire"),
        ("catalog-019", "Toxic", "Britney Spears"),
        ("catalog-020", "Get Lucky", "Daft Punk"),
    ]
    .into_iter()
    .map(|(id, name, artist)| Track {
        track_id: id.to_string(),
        track_name: name.to_string(),
        track_artist: artist.to_string(),
        track_image: None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timings.category, Duration::from_secs(10));
        assert_eq!(config.timings.submission, Duration::from_secs(20));
        assert_eq!(config.timings.voting, Duration::from_secs(15));
        assert_eq!(config.timings.results, Duration::from_secs(15));
        assert!(config.bots.catalog.len() >= config.bots.songs_per_bot);
        assert!(!config.allow_manual_advance);
    }

    #[test]
    fn playback_scales_with_submissions() {
        let timings = PhaseTimings::default();
        assert_eq!(
            timings.duration(RoundPhase::Playback, 3),
            timings.playback_per_song * 3
        );
        assert_eq!(timings.duration(RoundPhase::Playback, 0), Duration::ZERO);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "timings": { "voting_ms": 5000 },
                "bots": { "submit_delay_ms": [900, 100] },
                "voter_eligibility": "non_submitters",
                "allow_manual_advance": true
            }"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.timings.voting, Duration::from_secs(5));
        assert_eq!(config.timings.category, Duration::from_secs(10));
        assert_eq!(config.bots.submit_delay, DelayRange::from_millis(100, 900));
        assert_eq!(config.voter_eligibility, VoterEligibility::NonSubmitters);
        assert!(config.allow_manual_advance);
        assert_eq!(config.categories, default_categories());
    }

    #[test]
    fn empty_pools_fall_back_to_builtins() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "categories": [], "bots": { "roster": [] } }"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.categories.len(), 20);
        assert_eq!(config.bots.roster, default_roster());
    }
}
