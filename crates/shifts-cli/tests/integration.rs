use std::path::Path;

use shifts_cli::input::{Input, Settings, Stage};
use shifts_cli::runner::Runner;
use shifts_cli::table::{read_apex_list, Table};
use shifts_core::mass::MassModel;

const PEPTIDES: [&str; 3] = ["PEPTIDE", "SAMPLER", "LVNELTEFAK"];

fn settings(stage: Stage, json: serde_json::Value) -> anyhow::Result<Settings> {
    let input: Input = serde_json::from_value(json)?;
    let mut settings = input.build()?;
    settings.stage = stage;
    Ok(settings)
}

/// Simulated search engine output: 60 unmodified PSMs and two clusters of
/// modified PSMs, with a 3 ppm systematic error
fn write_psms(path: &Path) -> anyhow::Result<()> {
    let model = MassModel::default();
    let mut dms = vec![0.0; 60];
    for center in [0.985, 15.995] {
        for (step, n) in [5, 15, 30, 15, 5].into_iter().enumerate() {
            dms.extend(std::iter::repeat(center + (step as f64 - 2.0) * 0.002).take(n));
        }
    }

    let mut contents = String::from("# search engine banner\n");
    contents.push_str("scan\tsequence\tcharge\texp_mz\tscore\tprotein\n");
    for (k, dm) in dms.into_iter().enumerate() {
        let sequence = PEPTIDES[k % PEPTIDES.len()];
        let charge = 2 + (k % 2) as i32;
        let theo = model.theoretical(sequence, charge)?;
        let exp_mz = (theo.mz + dm / charge as f64) * (1.0 + 3E-6);
        let protein = match k % 7 {
            0 => "DECOY_sp|P00001",
            _ => "sp|P00001",
        };
        contents.push_str(&format!(
            "{}\t{}\t{}.0\t{}\t{}\t{}\n",
            k,
            sequence,
            charge,
            exp_mz,
            (k * 31) % 100,
            protein
        ));
    }
    std::fs::write(path, contents)?;
    Ok(())
}

#[test]
fn pipeline() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let experiment = dir.path().join("exp1");
    let out = dir.path().join("out");
    std::fs::create_dir_all(&experiment)?;

    let psms = experiment.join("psms.tsv");
    write_psms(&psms)?;
    let fwhm = experiment.join("fwhm.txt");
    std::fs::write(&fwhm, "Gaussian fit\nFWHM: 0.002\n")?;

    // Calibration
    let finished = Runner::new(settings(
        Stage::Calibrate,
        serde_json::json!({
            "skip_lines": 1,
            "output_directory": out,
            "input_paths": [psms],
        }),
    )?)
    .run()?;
    let calibrated = out.join("psms_calibrated.tsv");
    assert!(calibrated.is_file());
    assert!(out.join("psms_calibration.json").is_file());
    assert_eq!(finished.output_paths.len(), 3);

    let table = Table::read(&calibrated, 0)?;
    assert_eq!(table.len(), 200);
    assert!(table.column("scan").is_ok());
    let labels = table.strings("Label")?;
    assert_eq!(labels[0], "Decoy");
    assert_eq!(labels[1], "Target");
    let dm = table.floats("cal_dm_mh")?;
    assert!((dm[60 + 35].unwrap() - 0.985).abs() < 1E-6);

    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("psms_calibration.json"))?)?;
    let alpha = sidecar["before"]["alpha"].as_f64().unwrap();
    assert!((alpha - 3E-6).abs() < 1E-8);

    // Histogram
    Runner::new(settings(
        Stage::Histogram,
        serde_json::json!({
            "bin_width": 0.002,
            "slope_window": 2,
            "second_derivative_window": 1,
            "output_directory": out,
            "input_paths": [calibrated],
        }),
    )?)
    .run()?;
    let histogram = Table::read(out.join("DMHistogram.tsv"), 0)?;
    let bins = histogram.bins()?;
    assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 200);
    let dm_table = Table::read(out.join("DMTable.tsv"), 0)?;
    assert_eq!(dm_table.len(), 200);
    assert!(dm_table.strings("bin")?.iter().all(|b| b.starts_with('(')));
    assert!(dm_table.column("Experiment").is_ok());

    // Peaks
    Runner::new(settings(
        Stage::Peaks,
        serde_json::json!({
            "frequency_threshold": 10.0,
            "output_directory": out,
            "input_paths": [out.join("DMHistogram.tsv")],
        }),
    )?)
    .run()?;
    let apexes = read_apex_list(out.join("ApexList.txt"))?;
    assert!(apexes.iter().any(|a| (a - 0.985).abs() < 0.001));
    assert!(apexes.iter().any(|a| (a - 15.995).abs() < 0.001));

    // Assignation
    Runner::new(settings(
        Stage::Assign,
        serde_json::json!({
            "n_sigma": 2.0,
            "output_directory": out,
            "input_paths": [calibrated],
            "apex_path": out.join("ApexList.txt"),
            "fwhm_path": fwhm,
        }),
    )?)
    .run()?;
    let assigned = Table::read(out.join("PeakAssignation.tsv"), 0)?;
    assert_eq!(assigned.len(), 200);
    let sorted = assigned.floats("cal_dm_mh")?;
    assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
    let classes = assigned.strings("peak_class")?;
    assert!(classes.iter().all(|c| *c == "PEAK" || *c == "ORPHAN"));
    assert!(assigned
        .floats("global_fdr")?
        .iter()
        .flatten()
        .all(|f| *f >= 0.0));

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("results.json"))?)?;
    assert_eq!(results["stage"], "assign");
    Ok(())
}

#[test]
fn failing_files_are_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let good = dir.path().join("good.tsv");
    write_psms(&good)?;
    let bad = dir.path().join("bad.tsv");
    std::fs::write(&bad, "# banner\nsequence\tcharge\n PEPTIDE\t2\n")?;

    let finished = Runner::new(settings(
        Stage::Calibrate,
        serde_json::json!({
            "skip_lines": 1,
            "output_directory": dir.path(),
            "input_paths": [good, bad],
        }),
    )?)
    .run()?;
    assert!(dir.path().join("good_calibrated.tsv").is_file());
    assert!(!dir.path().join("bad_calibrated.tsv").exists());
    assert_eq!(finished.output_paths.len(), 3);

    let only_bad = settings(
        Stage::Calibrate,
        serde_json::json!({
            "skip_lines": 1,
            "output_directory": dir.path(),
            "input_paths": [bad],
        }),
    )?;
    assert!(Runner::new(only_bad).run().is_err());
    Ok(())
}

#[test]
fn stages_chain_with_one_parameter_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let experiment = dir.path().join("exp1");
    let out = dir.path().join("out");
    std::fs::create_dir_all(&experiment)?;
    let psms = experiment.join("psms.tsv");
    write_psms(&psms)?;
    std::fs::write(experiment.join("fwhm.txt"), "FWHM: 0.002\n")?;

    // Every stage reads the same parameters, including the banner skip
    let parameters = serde_json::json!({
        "skip_lines": 1,
        "bin_width": 0.002,
        "slope_window": 2,
        "second_derivative_window": 1,
        "frequency_threshold": 10.0,
        "n_sigma": 2.0,
        "output_directory": out,
        "apex_path": out.join("ApexList.txt"),
        "fwhm_path": experiment.join("fwhm.txt"),
    });
    let run_stage = |stage: Stage, input: &Path| -> anyhow::Result<Settings> {
        let mut current = settings(stage, parameters.clone())?;
        current.input_paths = vec![input.display().to_string()];
        Runner::new(current).run()
    };

    run_stage(Stage::Calibrate, &psms)?;
    let calibrated = out.join("psms_calibrated.tsv");
    run_stage(Stage::Histogram, &calibrated)?;
    run_stage(Stage::Peaks, &out.join("DMHistogram.tsv"))?;
    run_stage(Stage::Assign, &calibrated)?;

    let histogram = Table::read(out.join("DMHistogram.tsv"), 0)?;
    assert_eq!(
        histogram.bins()?.iter().map(|b| b.count).sum::<usize>(),
        200
    );
    let assigned = Table::read(out.join("PeakAssignation.tsv"), 0)?;
    assert_eq!(assigned.len(), 200);
    assert!(assigned
        .floats("FWHM")?
        .iter()
        .all(|f| *f == Some(0.002)));
    Ok(())
}

#[test]
fn fwhm_is_looked_up_per_experiment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let contents = "score\tprotein\tcal_dm_mh\n10\tsp|P1\t0.001\n5\tDECOY_sp|P2\t0.5\n";
    for name in ["exp1", "exp2", "exp3"] {
        std::fs::create_dir_all(dir.path().join(name))?;
        std::fs::write(dir.path().join(name).join("psms_calibrated.tsv"), contents)?;
    }
    // exp2 has no metadata of its own and falls back to the configured file
    std::fs::write(dir.path().join("exp1").join("fwhm.txt"), "FWHM: 0.004\n")?;
    std::fs::write(dir.path().join("fwhm.txt"), "Fit\nFWHM: 2.0\n")?;
    std::fs::write(dir.path().join("exp3").join("fwhm.txt"), "FWHM: n/a\n")?;
    std::fs::write(
        dir.path().join("exp2").join("broken.tsv"),
        "score\tprotein\n1\tsp|P3\n",
    )?;
    let apex = dir.path().join("ApexList.txt");
    std::fs::write(&apex, "0.0\n")?;

    let input = |files: &[&str]| {
        let paths: Vec<_> = files.iter().map(|f| dir.path().join(f)).collect();
        settings(
            Stage::Assign,
            serde_json::json!({
                "n_sigma": 1.0,
                "output_directory": dir.path(),
                "input_paths": paths,
                "apex_path": apex,
                "fwhm_path": dir.path().join("fwhm.txt"),
            }),
        )
    };

    // A table without delta masses is skipped, the others are assigned
    Runner::new(input(&[
        "exp1/psms_calibrated.tsv",
        "exp2/psms_calibrated.tsv",
        "exp2/broken.tsv",
    ])?)
    .run()?;

    let assigned = Table::read(dir.path().join("PeakAssignation.tsv"), 0)?;
    assert_eq!(assigned.len(), 4);
    let experiments = assigned.strings("Experiment")?;
    let fwhm = assigned.floats("FWHM")?;
    let dm = assigned.floats("cal_dm_mh")?;
    let classes = assigned.strings("peak_class")?;
    for ix in 0..assigned.len() {
        let (width, class) = match (experiments[ix].ends_with("exp1"), dm[ix] == Some(0.5)) {
            (true, true) => (0.004, "ORPHAN"),
            (true, false) => (0.004, "PEAK"),
            (false, _) => (2.0, "PEAK"),
        };
        assert_eq!(fwhm[ix], Some(width));
        assert_eq!(classes[ix], class);
    }

    assert!(Runner::new(input(&["exp3/psms_calibrated.tsv"])?)
        .run()
        .is_err());
    assert!(Runner::new(input(&["exp2/broken.tsv"])?).run().is_err());
    Ok(())
}
