use anyhow::{Context, Result, anyhow};
use pico_args::Arguments;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::{env, fs};

use crate::config::{ConfigState, Profile};
use crate::gestures::{GestureRecognizer, GestureStyle, Recognizer, UdlrRecognizer};
use crate::ipc::dispatch::{Action, GestureDispatcher, GestureKind};
use crate::ipc::pipeline::{Browser, ReplayScript};
use crate::tracker::MouseSample;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("replay") => {
            let profile_name: Option<String> = pargs.opt_value_from_str("--profile")?;
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl replay [--profile <name>] <script.json>"))?;
            replay(&path, profile_name.as_deref())
        }

        Some("classify") => {
            let style: GestureStyle = pargs
                .opt_value_from_str("--style")?
                .unwrap_or_default();
            let usage = || anyhow!("usage: gesturectl classify [--style <style>] <dx> <dy>");
            let dx: f64 = pargs.free_from_str().map_err(|_| usage())?;
            let dy: f64 = pargs.free_from_str().map_err(|_| usage())?;
            match style.classifier().classify(dx, dy) {
                Some(d) => println!("{}", d.symbol()),
                None => println!("(no movement)"),
            }
            Ok(())
        }

        Some("trace") => {
            let udlr = pargs.contains("--udlr");
            let style: GestureStyle = pargs
                .opt_value_from_str("--style")?
                .unwrap_or_default();
            let fidelity: f64 = pargs.opt_value_from_str("--fidelity")?.unwrap_or(10.0);
            let moves: Vec<String> = pargs
                .finish()
                .into_iter()
                .map(|s| s.to_string_lossy().into_owned())
                .collect();
            if moves.is_empty() {
                return Err(anyhow!("usage: gesturectl trace [--udlr] [--style <style>] [--fidelity <px>] <dx,dy>..."));
            }
            let gesture = if udlr {
                trace(&mut UdlrRecognizer::new(fidelity), &moves)?
            } else {
                trace(&mut GestureRecognizer::new(style, fidelity), &moves)?
            };
            println!("{gesture}");
            Ok(())
        }

        Some("lookup") => {
            let kind = match pargs.opt_value_from_str::<_, String>("--kind")?.as_deref() {
                None | Some("mouse") => GestureKind::Mouse,
                Some("wheel") => GestureKind::Wheel,
                Some("chord") => GestureKind::Chord,
                Some(other) => return Err(anyhow!("unknown gesture kind: {other}")),
            };
            let gesture: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl lookup [--kind <mouse|wheel|chord>] <gesture>"))?;
            let cfg = ConfigState::load_or_install_default()?;
            let dispatcher = GestureDispatcher::new(Arc::new(Mutex::new(cfg.profile)));
            match dispatcher.resolve(&gesture, kind) {
                Some(Action::Command(c)) => println!("{gesture} -> {c} ({})", c.label()),
                Some(Action::UserScript(s)) => println!("{gesture} -> script '{}'", s.id),
                None => println!("{gesture} -> (unmapped)"),
            }
            Ok(())
        }

        Some("reload") => {
            let mut cfg = ConfigState::load_or_install_default()?;
            cfg.reload()?;
            println!(
                "ok: profile '{}' is valid ({} mouse, {} wheel, {} chord mappings)",
                cfg.active_name,
                cfg.profile.mouse.len(),
                cfg.profile.wheel.len(),
                cfg.profile.chord.len()
            );
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl use <profile_name>"))?;
            let mut cfg = ConfigState::load_or_install_default()?;
            cfg.set_active(&name)?;
            println!("ok: active profile is now '{}'", cfg.active_name);
            Ok(())
        }

        Some("list") => {
            let cfg = ConfigState::load_or_install_default()?;
            for name in cfg.list_profiles() {
                let mark = if name == cfg.active_name { "*" } else { " " };
                println!("{mark} {name}");
            }
            Ok(())
        }

        Some("doctor") => {
            let cfg = ConfigState::load_or_install_default()?;
            print_response(&cfg.doctor_report());
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn replay(path: &Path, profile_name: Option<&str>) -> Result<()> {
    replay_with(path, profile_name, ConfigState::load_or_install_default)
}

fn replay_with(
    path: &Path,
    profile_name: Option<&str>,
    open_config: impl Fn() -> Result<ConfigState>,
) -> Result<()> {
    let txt = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let script: ReplayScript =
        serde_json::from_str(&txt).with_context(|| format!("failed to parse {}", path.display()))?;

    let profile = match (&script.profile, profile_name) {
        (_, Some(name)) => open_config()?.load_profile(name)?,
        (Some(rel), None) => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            Profile::load(&base.join(rel))?
        }
        (None, None) => open_config()?.profile,
    };

    let mut browser = Browser::new(profile)?;
    if let Some(dir) = path.parent() {
        browser.set_base_dir(dir);
    }
    browser.replay(&script)?;
    for line in browser.log() {
        println!("{line}");
    }
    let active = browser.active_tab();
    for id in browser.tab_ids() {
        let mark = if Some(id) == active { "*" } else { " " };
        let url = browser.tab(id).map(|t| t.url().to_string()).unwrap_or_default();
        let state = browser.top_state(id).unwrap_or_default();
        let gesture = browser.current_gesture(id).unwrap_or_default();
        let trail = browser.trail(id).len();
        println!("{mark} tab {id} {url}: state={state:?} gesture='{gesture}' trail={trail}");
        let windows = browser.tab(id).map(|t| t.windows()).unwrap_or_default();
        for w in windows {
            let (Some(replica), Some(scroll)) = (browser.replica(w), browser.scroll_y(w)) else {
                continue;
            };
            let menu = if replica.context_menu { "allowed" } else { "suppressed" };
            println!("    frame {w}: scroll_y={scroll} context_menu={menu}");
        }
    }
    if let Some(status) = browser.status() {
        println!("status: {status}");
    }
    Ok(())
}

/// Feed `dx,dy` moves from the origin through a recognizer.
fn trace(recognizer: &mut dyn Recognizer, moves: &[String]) -> Result<String> {
    let origin = MouseSample::default();
    recognizer.reset(&origin);
    let (mut x, mut y) = (0.0, 0.0);
    for m in moves {
        let (dx, dy) = m
            .split_once(',')
            .ok_or_else(|| anyhow!("expected dx,dy but got '{m}'"))?;
        let dx: f64 = dx.trim().parse().with_context(|| format!("bad dx in '{m}'"))?;
        let dy: f64 = dy.trim().parse().with_context(|| format!("bad dy in '{m}'"))?;
        x += dx;
        y += dy;
        recognizer.add_point(&MouseSample {
            x,
            y,
            dx,
            dy,
            ..origin
        });
    }
    Ok(recognizer.current_gesture())
}

fn print_help() {
    println!(
        r#"gesturectl - mouse gesture engine for a multi-frame browser model

USAGE:
  gesturectl help [command]                          Show general or command-specific help
  gesturectl replay [--profile <name>] <script.json> Run a recorded input script
  gesturectl classify [--style <style>] <dx> <dy>    Classify one movement
  gesturectl trace [--udlr] [--style <style>] <dx,dy>...
                                                     Recognize a gesture from moves
  gesturectl lookup [--kind <kind>] <gesture>        Resolve a gesture in the active profile
  gesturectl reload                                  Re-read and validate the active profile
  gesturectl use <name>                              Switch active profile
  gesturectl list                                    List profiles
  gesturectl doctor                                  Check profiles and settings

STYLES: cardinal, intercardinal45, intercardinal60

TIPS:
  - Profiles: ~/.config/gesturectl/profiles
  - Active profile pointer: ~/.config/gesturectl/active
  - Log filter: GESTURECTL_LOG (falls back to RUST_LOG)
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "replay" => println!(
            "usage: gesturectl replay [--profile <name>] <script.json>\nLoads tabs and frames from the script, runs its steps and prints what the host did."
        ),
        "classify" => println!(
            "usage: gesturectl classify [--style <style>] <dx> <dy>\nPrints the direction symbol for one movement."
        ),
        "trace" => println!(
            "usage: gesturectl trace [--udlr] [--style <style>] [--fidelity <px>] <dx,dy>...\nPrints the gesture string the moves produce."
        ),
        "lookup" => println!(
            "usage: gesturectl lookup [--kind <mouse|wheel|chord>] <gesture>\nShows what the active profile maps the gesture to."
        ),
        "reload" => println!(
            "usage: gesturectl reload\nRe-reads the active profile from disk and reports errors."
        ),
        "use" => {
            println!("usage: gesturectl use <name>\nSwitches active profile to <name>.")
        }
        "list" => {
            println!("usage: gesturectl list\nLists available profiles; marks active with '*'.")
        }
        "doctor" => println!(
            "usage: gesturectl doctor\nValidates every profile and prints the active settings."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(m: &[&str]) -> Vec<String> {
        m.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn trace_needs_two_agreeing_moves() {
        let mut r = GestureRecognizer::new(GestureStyle::Cardinal, 10.0);
        assert_eq!(trace(&mut r, &moves(&["12,0"])).unwrap(), "");
        let mut r = GestureRecognizer::new(GestureStyle::Cardinal, 10.0);
        assert_eq!(trace(&mut r, &moves(&["12,0", "12,0", "0,12", "0,12"])).unwrap(), "RD");
    }

    #[test]
    fn trace_udlr_appends_on_change() {
        let mut r = UdlrRecognizer::new(10.0);
        assert_eq!(trace(&mut r, &moves(&["12,0", "0,-12"])).unwrap(), "RU");
    }

    #[test]
    fn trace_rejects_bad_moves() {
        let mut r = UdlrRecognizer::new(10.0);
        assert!(trace(&mut r, &moves(&["12"])).is_err());
        assert!(trace(&mut r, &moves(&["a,1"])).is_err());
    }

    #[test]
    fn replays_script_with_relative_profile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("p.toml"),
            "[mouse]\nDR = \"closeTab\"\n",
        )
        .unwrap();
        let script = serde_json::json!({
            "profile": "p.toml",
            "tabs": [
                { "url": "https://a.example/", "frame": { "id": 1 } },
                { "url": "https://b.example/", "frame": { "id": 2 } }
            ],
            "steps": [
                { "type": "mousedown", "frame": 1 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 15.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 15.0 },
                { "type": "mousemove", "frame": 1, "dx": 15.0, "dy": 0.0 },
                { "type": "mousemove", "frame": 1, "dx": 15.0, "dy": 0.0 },
                { "type": "mouseup", "frame": 1 }
            ]
        });
        let path = dir.path().join("s.json");
        fs::write(&path, script.to_string()).unwrap();
        replay(&path, None).unwrap();
    }

    #[test]
    fn replay_profile_flag_leaves_active_profile_alone() {
        let home = tempfile::tempdir().unwrap();
        let cfgdir = home.path().join("gesturectl");
        let open = || ConfigState::load_from(cfgdir.clone());
        let cfg = open().unwrap();
        fs::write(
            cfg.profiles_dir.join("work.toml"),
            "[meta]\nname = \"work\"\n[mouse]\nD = \"reload\"\n",
        )
        .unwrap();

        let path = home.path().join("s.json");
        let script = serde_json::json!({
            "tabs": [{ "url": "https://a.example/", "frame": { "id": 1 } }],
            "steps": [{ "type": "mousedown", "frame": 1 }, { "type": "mouseup", "frame": 1 }]
        });
        fs::write(&path, script.to_string()).unwrap();

        replay_with(&path, Some("work"), open).unwrap();
        assert_eq!(fs::read_to_string(&cfg.active_ptr).unwrap().trim(), "default");
        assert_eq!(open().unwrap().active_name, "default");
        assert!(replay_with(&path, Some("missing"), open).is_err());
    }
}
