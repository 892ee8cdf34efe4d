use clap::{value_parser, Arg, ArgMatches, Command, ValueHint};
use rayon::ThreadPoolBuilder;
use shifts_cli::input::{Input, Stage};
use shifts_cli::runner::Runner;

fn stage_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("files")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to tab-separated input tables. Overrides `input_paths` \
                     listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
}

fn run(stage: Stage, matches: &ArgMatches) -> anyhow::Result<()> {
    let input = Input::from_arguments(stage, matches)?;
    let settings = input.build()?;
    Runner::new(settings).run()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SHIFTS_LOG", "error,shifts=info"))
        .init();

    let matches = Command::new("shifts")
        .version(clap::crate_version!())
        .about("Delta-mass calibration, peak modelling and peak assignation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("threads")
                .long("threads")
                .global(true)
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .subcommand(stage_command(
            "calibrate",
            "Correct systematic precursor mass error, one file at a time",
        ))
        .subcommand(stage_command(
            "histogram",
            "Bin calibrated delta masses and compute slopes",
        ))
        .subcommand(stage_command(
            "peaks",
            "Detect peaks in a delta-mass histogram",
        ))
        .subcommand(
            stage_command(
                "assign",
                "Assign PSMs to their closest peak and compute FDR",
            )
            .arg(
                Arg::new("apex")
                    .long("apex")
                    .value_parser(clap::builder::NonEmptyStringValueParser::new())
                    .help("Apex list produced by `peaks`")
                    .value_hint(ValueHint::FilePath),
            )
            .arg(
                Arg::new("fwhm")
                    .long("fwhm")
                    .value_parser(clap::builder::NonEmptyStringValueParser::new())
                    .help("Metadata file containing a `FWHM: <value>` line")
                    .value_hint(ValueHint::FilePath),
            ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow::anyhow!("a subcommand is required"))?;
    let stage =
        Stage::from_name(name).ok_or_else(|| anyhow::anyhow!("unknown subcommand `{name}`"))?;

    let threads = sub
        .get_one::<u16>("threads")
        .or_else(|| matches.get_one::<u16>("threads"))
        .copied()
        .map(usize::from)
        .unwrap_or_else(num_cpus::get);
    ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    log::trace!("running `{}` on {} threads", name, threads);

    run(stage, sub)
}
