use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use crate::actions::CommandId;
use crate::gestures::{GestureStyle, WheelDirection};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
    #[serde(default)]
    pub allow_scripts: bool,
}

/// The knobs the gesture core reads. Runtime changes go through `apply`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gesture_button: u8,
    pub gesture_timeout_ms: u64,
    pub gesture_fidelity: f64,
    pub gesture_style: GestureStyle,
    pub wheel_gestures: bool,
    pub chord_gestures: bool,
    pub draw_trail: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gesture_button: 2,
            gesture_timeout_ms: 1000,
            gesture_fidelity: 10.0,
            gesture_style: GestureStyle::Cardinal,
            wheel_gestures: false,
            chord_gestures: false,
            draw_trail: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsPatch {
    pub gesture_button: Option<u8>,
    pub gesture_timeout_ms: Option<u64>,
    pub gesture_fidelity: Option<f64>,
    pub gesture_style: Option<GestureStyle>,
    pub wheel_gestures: Option<bool>,
    pub chord_gestures: Option<bool>,
    pub draw_trail: Option<bool>,
}

impl From<&Settings> for SettingsPatch {
    fn from(s: &Settings) -> Self {
        Self {
            gesture_button: Some(s.gesture_button),
            gesture_timeout_ms: Some(s.gesture_timeout_ms),
            gesture_fidelity: Some(s.gesture_fidelity),
            gesture_style: Some(s.gesture_style),
            wheel_gestures: Some(s.wheel_gestures),
            chord_gestures: Some(s.chord_gestures),
            draw_trail: Some(s.draw_trail),
        }
    }
}

impl Settings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.gesture_button {
            self.gesture_button = v;
        }
        if let Some(v) = patch.gesture_timeout_ms {
            self.gesture_timeout_ms = v;
        }
        if let Some(v) = patch.gesture_fidelity {
            self.gesture_fidelity = v;
        }
        if let Some(v) = patch.gesture_style {
            self.gesture_style = v;
        }
        if let Some(v) = patch.wheel_gestures {
            self.wheel_gestures = v;
        }
        if let Some(v) = patch.chord_gestures {
            self.chord_gestures = v;
        }
        if let Some(v) = patch.draw_trail {
            self.draw_trail = v;
        }
    }
}

/// One gesture slot. When both targets are set the script wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub gesture: String,
    pub command: Option<String>,
    pub script: Option<String>,
}

pub type MappingTable = HashMap<String, Mapping>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub settings: Settings,

    #[serde(default, deserialize_with = "deserialize_mappings")]
    pub mouse: MappingTable,
    #[serde(default, deserialize_with = "deserialize_mappings")]
    pub wheel: MappingTable,
    #[serde(default, deserialize_with = "deserialize_mappings")]
    pub chord: MappingTable,

    /// User-script id -> body.
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Short(String),
    Full {
        command: Option<String>,
        script: Option<String>,
    },
}

// "script:<id>" or a command id, or { command = .., script = .. }
fn deserialize_mappings<'de, D>(de: D) -> std::result::Result<MappingTable, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, RawTarget>::deserialize(de)?;
    let mut out = MappingTable::new();
    for (gesture, target) in raw {
        let (command, script) = match target {
            RawTarget::Short(s) => match s.strip_prefix("script:") {
                Some(id) => (None, Some(id.trim().to_string())),
                None => (Some(s.trim().to_string()), None),
            },
            RawTarget::Full { command, script } => (command, script),
        };
        // last write wins on reassignment
        out.insert(
            gesture.clone(),
            Mapping {
                gesture,
                command,
                script,
            },
        );
    }
    Ok(out)
}

impl Profile {
    pub fn from_toml(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        Self::from_toml(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
    }

    #[cfg(test)]
    pub fn default_profile() -> Result<Self> {
        Self::from_toml(default_profile_text())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    Ok(dirs.home_dir().join(".config").join("gesturectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl ConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir()?)
    }

    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            fs::write(&active_ptr, b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Profile::load(&profdir.join(format!("{active_name}.toml")))?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = Profile::load(&self.profile_path(&self.active_name))?;
        Ok(())
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(format!("{name}.toml"))
    }

    /// Load a named profile without making it active.
    pub fn load_profile(&self, name: &str) -> Result<Profile> {
        let p = self.profile_path(name);
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        Profile::load(&p)
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let profile = self.load_profile(name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let s = &self.profile.settings;
        let broken: Vec<String> = self
            .list_profiles()
            .into_iter()
            .filter(|name| match Profile::load(&self.profile_path(name)) {
                Ok(_) => false,
                Err(e) => {
                    warn!("doctor: {e}");
                    true
                }
            })
            .collect();
        serde_json::json!({
            "user": whoami::username(),
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "broken_profiles": broken,
            "settings": {
                "gesture_button": s.gesture_button,
                "gesture_timeout_ms": s.gesture_timeout_ms,
                "gesture_fidelity": s.gesture_fidelity,
                "gesture_style": s.gesture_style.as_str(),
                "wheel_gestures": s.wheel_gestures,
                "chord_gestures": s.chord_gestures,
                "draw_trail": s.draw_trail,
            },
            "mappings": {
                "mouse": self.profile.mouse.len(),
                "wheel": self.profile.wheel.len(),
                "chord": self.profile.chord.len(),
                "scripts": self.profile.scripts.len(),
            }
        })
    }
}

fn validate_profile(p: &Profile) -> Result<()> {
    let s = &p.settings;
    if s.gesture_fidelity.is_nan() || s.gesture_fidelity <= 0.0 {
        return Err(anyhow!("settings.gesture_fidelity must be positive"));
    }
    if s.gesture_button > 4 {
        return Err(anyhow!("settings.gesture_button must be 0..=4"));
    }

    for (id, body) in &p.scripts {
        if id.trim().is_empty() {
            return Err(anyhow!("empty script id"));
        }
        if body.trim().is_empty() {
            return Err(anyhow!("script '{id}' has an empty body"));
        }
    }

    let tables = [("mouse", &p.mouse), ("wheel", &p.wheel), ("chord", &p.chord)];
    for (kind, table) in tables {
        for (gesture, m) in table {
            if gesture.trim().is_empty() {
                return Err(anyhow!("empty {kind} gesture key"));
            }
            if m.command.is_none() && m.script.is_none() {
                return Err(anyhow!("{kind} gesture '{gesture}' has no target"));
            }
            if let Some(cmd) = &m.command {
                cmd.parse::<CommandId>()
                    .map_err(|e| anyhow!("{kind} gesture '{gesture}': {e}"))?;
            }
            if let Some(id) = &m.script {
                if !p.meta.allow_scripts {
                    return Err(anyhow!(
                        "{kind} gesture '{gesture}' uses a script but allow_scripts=false"
                    ));
                }
                if !p.scripts.contains_key(id) {
                    return Err(anyhow!("{kind} gesture '{gesture}' names unknown script '{id}'"));
                }
            }
        }
    }

    let wheel_keys = WheelDirection::all().map(|d| d.as_str());
    if let Some(bad) = p.wheel.keys().find(|k| !wheel_keys.contains(&k.as_str())) {
        return Err(anyhow!("wheel gesture '{bad}' must be one of up/down/left/right"));
    }
    Ok(())
}
