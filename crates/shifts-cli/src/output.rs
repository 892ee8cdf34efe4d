use std::path::Path;

use csv::ByteRecord;
use rayon::prelude::*;
use shifts_core::{
    assign::{AssignInput, Assignment},
    calibration::CalibratedPsm,
    fdr::RankedFdr,
    histogram::Histogram,
};

use crate::table::Table;
use crate::Runner;

pub const CALIBRATED_COLUMNS: [&str; 11] = [
    "Label",
    "theo_mz",
    "theo_mh",
    "abs_error",
    "ppm",
    "cal_exp_mz",
    "cal_exp_mh",
    "dm_mz",
    "dm_mh",
    "cal_dm_mz",
    "cal_ppm",
];

pub const ASSIGNED_COLUMNS: [&str; 14] = [
    "FWHM",
    "closest_peak",
    "peak_class",
    "deltamass",
    "dm_bin",
    "local_rank_t",
    "local_rank_d",
    "local_fdr",
    "peak_rank_t",
    "peak_rank_d",
    "peak_fdr",
    "global_rank_t",
    "global_rank_d",
    "global_fdr",
];

/// Undefined and non-finite values are written as empty cells
fn push_float(record: &mut ByteRecord, x: Option<f64>) {
    match x.filter(|x| x.is_finite()) {
        Some(x) => record.push_field(ryu::Buffer::new().format(x).as_bytes()),
        None => record.push_field(b""),
    }
}

fn push_fdr(record: &mut ByteRecord, fdr: Option<RankedFdr>) {
    match fdr {
        Some(fdr) => {
            record.push_field(itoa::Buffer::new().format(fdr.rank_t).as_bytes());
            record.push_field(itoa::Buffer::new().format(fdr.rank_d).as_bytes());
            push_float(record, fdr.fdr);
        }
        None => {
            record.push_field(b"");
            record.push_field(b"");
            record.push_field(b"");
        }
    }
}

fn input_record(row: &[String]) -> ByteRecord {
    let mut record = ByteRecord::new();
    for cell in row {
        record.push_field(cell.as_bytes());
    }
    record
}

fn write_records<P: AsRef<Path>>(
    path: P,
    headers: ByteRecord,
    records: Vec<ByteRecord>,
) -> anyhow::Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(vec![]);
    wtr.write_byte_record(&headers)?;
    for record in records {
        wtr.write_byte_record(&record)?;
    }
    wtr.flush()?;
    let bytes = wtr.into_inner()?;
    std::fs::write(path.as_ref(), bytes)?;
    Ok(path.as_ref().display().to_string())
}

impl Runner {
    pub fn serialize_calibrated(&self, row: &[String], cal: &CalibratedPsm) -> ByteRecord {
        let mut record = input_record(row);
        record.push_field(cal.label.as_str().as_bytes());
        push_float(&mut record, Some(cal.theo_mz));
        push_float(&mut record, Some(cal.theo_mh));
        push_float(&mut record, Some(cal.abs_error));
        push_float(&mut record, Some(cal.ppm));
        push_float(&mut record, Some(cal.cal_exp_mz));
        push_float(&mut record, Some(cal.cal_exp_mh));
        push_float(&mut record, Some(cal.dm_mz));
        push_float(&mut record, Some(cal.dm_mh));
        push_float(&mut record, Some(cal.cal_dm_mz));
        push_float(&mut record, Some(cal.cal_dm_mh));
        push_float(&mut record, Some(cal.cal_ppm));
        record
    }

    pub fn write_calibrated<P: AsRef<Path>>(
        &self,
        path: P,
        table: &Table,
        calibrated: &[CalibratedPsm],
    ) -> anyhow::Result<String> {
        let mut headers = ByteRecord::from(table.headers.clone());
        for name in &CALIBRATED_COLUMNS[..10] {
            headers.push_field(name.as_bytes());
        }
        headers.push_field(self.parameters.columns.cal_dm_mh.as_bytes());
        headers.push_field(CALIBRATED_COLUMNS[10].as_bytes());

        let records = table
            .rows
            .par_iter()
            .zip(calibrated.par_iter())
            .map(|(row, cal)| self.serialize_calibrated(row, cal))
            .collect::<Vec<_>>();
        write_records(path, headers, records)
    }

    pub fn write_histogram(&self, histogram: &Histogram) -> anyhow::Result<String> {
        let path = self.make_path("DMHistogram.tsv");
        let headers = ByteRecord::from(vec![
            "bin",
            "midpoint",
            "count",
            "smooth_count",
            "slope1",
            "slope2",
        ]);
        let records = histogram
            .bins
            .iter()
            .map(|bin| {
                let mut record = ByteRecord::new();
                record.push_field(bin.to_string().as_bytes());
                push_float(&mut record, Some(bin.midpoint));
                record.push_field(itoa::Buffer::new().format(bin.count).as_bytes());
                push_float(&mut record, bin.smooth_count);
                push_float(&mut record, bin.slope1);
                push_float(&mut record, bin.slope2);
                record
            })
            .collect::<Vec<_>>();
        write_records(path, headers, records)
    }

    /// PSM table with the histogram interval each delta mass falls into
    pub fn write_dm_table(
        &self,
        table: &Table,
        delta_masses: &[Option<f64>],
        histogram: &Histogram,
    ) -> anyhow::Result<String> {
        let path = self.make_path("DMTable.tsv");
        let mut headers = ByteRecord::from(table.headers.clone());
        headers.push_field(b"bin");
        let records = table
            .rows
            .par_iter()
            .zip(delta_masses.par_iter())
            .map(|(row, dm)| {
                let mut record = input_record(row);
                match dm.and_then(|dm| histogram.locate(dm)) {
                    Some(ix) => record.push_field(histogram.bins[ix].to_string().as_bytes()),
                    None => record.push_field(b""),
                }
                record
            })
            .collect::<Vec<_>>();
        write_records(path, headers, records)
    }

    pub fn write_apex_list(&self, apexes: &[f64]) -> anyhow::Result<String> {
        let path = self.make_path("ApexList.txt");
        let mut contents = String::new();
        for apex in apexes {
            contents.push_str(ryu::Buffer::new().format(*apex));
            contents.push('\n');
        }
        std::fs::write(&path, contents)?;
        Ok(path.display().to_string())
    }

    pub fn serialize_assignment(
        &self,
        row: &[String],
        input: &AssignInput,
        assigned: &Assignment,
    ) -> ByteRecord {
        let mut record = input_record(row);
        push_float(&mut record, Some(input.fwhm));
        push_float(&mut record, assigned.closest_peak);
        record.push_field(assigned.class.to_string().as_bytes());
        push_float(&mut record, assigned.deltamass);
        match assigned.dm_bin {
            Some(bin) => record.push_field(itoa::Buffer::new().format(bin).as_bytes()),
            None => record.push_field(b""),
        }
        push_fdr(&mut record, assigned.local);
        push_fdr(&mut record, assigned.peak);
        push_fdr(&mut record, assigned.global);
        record
    }

    /// Write assignments in the given row order
    pub fn write_assignments(
        &self,
        table: &Table,
        inputs: &[AssignInput],
        assigned: &[Assignment],
        order: &[usize],
    ) -> anyhow::Result<String> {
        let path = self.make_path("PeakAssignation.tsv");
        let mut headers = ByteRecord::from(table.headers.clone());
        for name in ASSIGNED_COLUMNS {
            headers.push_field(name.as_bytes());
        }
        let records = order
            .par_iter()
            .map(|&ix| self.serialize_assignment(&table.rows[ix], &inputs[ix], &assigned[ix]))
            .collect::<Vec<_>>();
        write_records(path, headers, records)
    }
}
