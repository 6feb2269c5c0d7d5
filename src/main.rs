use std::str::FromStr;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info};

use trackloop::environment::TrackingEnv;
use trackloop::link::relay::{open_relay_links, open_scheduler_link, RelayNode, SchedulerLink};
use trackloop::link::serial::list_ports;
use trackloop::logging::{init_logging, level_from_verbosity, parse_log_level, LogConfig, LogOutput};
use trackloop::models::Position2D;
use trackloop::policy::build_policy;
use trackloop::scenario::{MockMode, PolicyKind, ScenarioConfig};
use trackloop::simulation::{evaluate, run_episode, EpisodeRecorder};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn build_cli() -> Command {
    Command::new("trackloop")
        .version("0.1.0")
        .about("センサースケジューリング追跡テストベッド")
        .long_about("移動目標を複数の固定センサーのどれで追跡するかを方策が選び、\n\
                     シミュレーションまたはLoRa無線経由の実機で閉ループを回します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("シナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、既定のセンサー配置（3基）を使用します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .action(ArgAction::SetTrue)
                .help("1エピソードを記録付きで実行")
        )
        .arg(
            Arg::new("evaluate")
                .long("evaluate")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Nエピソードで方策を評価")
        )
        .arg(
            Arg::new("relay")
                .long("relay")
                .action(ArgAction::SetTrue)
                .help("センサーノード側の中継ループを実行")
        )
        .arg(
            Arg::new("schedule")
                .long("schedule")
                .action(ArgAction::SetTrue)
                .help("スケジューラ側の無線ループを実行")
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .action(ArgAction::SetTrue)
                .help("利用可能なシリアルポートを表示")
        )
        .group(
            clap::ArgGroup::new("mode")
                .args(["info", "simulate", "evaluate", "relay", "schedule", "list-ports"])
                .multiple(false)
        )
        .arg(
            Arg::new("policy")
                .short('p')
                .long("policy")
                .value_name("KIND")
                .help("方策 (fixed, random, nearest)")
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .value_parser(clap::value_parser!(u64))
                .help("環境の乱数シードを上書き")
        )
        .arg(
            Arg::new("cycles")
                .long("cycles")
                .value_name("N")
                .value_parser(clap::value_parser!(u32))
                .help("現場ループのサイクル数（省略時は無制限）")
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .value_name("MODE")
                .help("模擬デバイス (none, lora, sensor, both または 0-3)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: debug, -vv: trace)")
        )
}

fn main() {
    let matches = build_cli().get_matches();

    let log_config = match log_config_from(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };
    let guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&matches) {
        error!("{}", e);
        eprintln!("エラー: {}", e);
        // exit はデストラクタを実行しないため先にログを送出する
        drop(guard);
        std::process::exit(1);
    }
}

fn log_config_from(matches: &ArgMatches) -> CliResult<LogConfig> {
    let output = matches
        .get_one::<String>("log-output")
        .map(|s| LogOutput::from_str(s))
        .transpose()?
        .unwrap_or(LogOutput::Console);
    let base = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or(tracing::Level::INFO);

    Ok(LogConfig {
        level: level_from_verbosity(matches.get_count("verbose"), base),
        output,
        ..LogConfig::default()
    })
}

/// シナリオを読み込み、コマンドラインの上書きを反映する
fn load_scenario(matches: &ArgMatches) -> CliResult<ScenarioConfig> {
    let mut scenario = match matches.get_one::<String>("scenario") {
        Some(path) => {
            let scenario = ScenarioConfig::from_file(path)?;
            info!("シナリオファイル読み込み完了: {}", path);
            scenario
        }
        None => ScenarioConfig::default(),
    };

    if let Some(seed) = matches.get_one::<u64>("seed") {
        scenario.env.seed = *seed;
    }
    if let Some(kind) = matches.get_one::<String>("policy") {
        scenario.policy.kind = PolicyKind::from_str(kind)?;
    }
    if let Some(mode) = matches.get_one::<String>("mock") {
        scenario.link.mock = MockMode::from_str(mode)?;
    }

    scenario.validate()?;
    Ok(scenario)
}

fn run(matches: &ArgMatches) -> CliResult<()> {
    if matches.get_flag("list-ports") {
        return show_ports();
    }

    let scenario = load_scenario(matches)?;
    let cycles = matches.get_one::<u32>("cycles").copied();

    if matches.get_flag("info") {
        scenario.print_summary();
    } else if matches.get_flag("simulate") {
        simulate(&scenario)?;
    } else if let Some(episodes) = matches.get_one::<usize>("evaluate") {
        run_evaluation(&scenario, *episodes)?;
    } else if matches.get_flag("relay") {
        run_relay(&scenario, cycles)?;
    } else if matches.get_flag("schedule") {
        run_scheduler(&scenario, cycles)?;
    } else {
        show_default_help();
    }
    Ok(())
}

fn simulate(scenario: &ScenarioConfig) -> CliResult<()> {
    let mut env = TrackingEnv::from_scenario(scenario);
    let mut policy = build_policy(&scenario.policy, &env.layout);
    let mut recorder = EpisodeRecorder::new();

    let stats = run_episode(&mut env, policy.as_mut(), Some(&mut recorder))?;

    println!("方策: {}", policy.name());
    println!("終了理由: {}", if stats.lost { "ロスト" } else { "最大ステップ到達" });
    println!("切り替え率: {:.1}%", stats.switch_rate() * 100.0);
    println!();
    recorder.print_summary(env.act_dim());
    Ok(())
}

fn run_evaluation(scenario: &ScenarioConfig, episodes: usize) -> CliResult<()> {
    let mut env = TrackingEnv::from_scenario(scenario);
    let mut policy = build_policy(&scenario.policy, &env.layout);
    let summary = evaluate(&mut env, policy.as_mut(), episodes)?;
    summary.print();
    Ok(())
}

fn run_relay(scenario: &ScenarioConfig, cycles: Option<u32>) -> CliResult<()> {
    let (lora, sensor) = open_relay_links(&scenario.link)?;
    let mut node = RelayNode::new(lora, sensor, &scenario.link);
    let stats = node.run(cycles)?;
    println!(
        "中継結果: {}サイクル, 電源オン {}回, 中継 {}回, 測定失敗 {}回",
        stats.cycles, stats.power_on, stats.relayed, stats.no_measurement
    );
    Ok(())
}

fn run_scheduler(scenario: &ScenarioConfig, cycles: Option<u32>) -> CliResult<()> {
    let layout = scenario.sensor_layout();
    let initial_sender = layout
        .get(0)
        .and_then(|sensor| sensor.address)
        .unwrap_or(scenario.link.addr_target);
    let transport = open_scheduler_link(&scenario.link, initial_sender, scenario.env.seed)?;

    let region = scenario.env.spawn_rect.to_region();
    let initial_position = Position2D::new(
        (region.xmin + region.xmax) / 2.0,
        (region.ymin + region.ymax) / 2.0,
    );

    let policy = build_policy(&scenario.policy, &layout);
    let mut link = SchedulerLink::new(transport, layout, policy, &scenario.link, initial_position);
    let decisions = link.run(cycles)?;
    println!("スケジューラ終了: 判断 {}回", decisions);
    Ok(())
}

fn show_ports() -> CliResult<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("シリアルポートが見つかりません");
    }
    for (name, description) in ports {
        println!("{} - {}", name, description);
    }
    Ok(())
}

/// デフォルトヘルプを表示
fn show_default_help() {
    println!("使用方法:");
    println!("  trackloop [オプション]");
    println!();
    println!("モード:");
    println!("  -i, --info             シナリオ情報のみ表示");
    println!("      --simulate         1エピソードを実行して記録を表示");
    println!("      --evaluate <N>     Nエピソードで方策を評価");
    println!("      --relay            センサーノード側の中継ループ");
    println!("      --schedule         スケジューラ側の無線ループ");
    println!("      --list-ports       シリアルポート一覧");
    println!();
    println!("例:");
    println!("  trackloop --simulate --policy nearest");
    println!("  trackloop -s scenarios/reference.yaml --evaluate 1000");
    println!("  trackloop --relay --mock both --cycles 10");
}
