use crate::track::KinematicSample;
use std::io::{self, Write};

pub const HEADER: &str = "particle t Sx Sy Sz x y z vx vy vz Bx By Bz Ex Ey Ez \
dExdx dExdy dExdz dEydx dEydy dEydz dEzdx dEzdy dEzdz";

/// One sampled spin state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinRecord<'a> {
    pub particle: &'a str,
    pub time: f64,
    pub spin: [f64; 3],
    pub kinematics: KinematicSample,
    pub field: [f64; 3],
}

/// Writes space-delimited rows; the header goes out once, before the first row.
///
/// The stream is borrowed. It is never flushed or closed here.
pub struct SpinLog<'a> {
    out: &'a mut dyn Write,
    header_written: bool,
    rows: usize,
}

impl<'a> SpinLog<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            header_written: false,
            rows: 0,
        }
    }

    /// For a stream that already carries the header, e.g. one shared with
    /// other particles.
    pub fn continuing(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            header_written: true,
            rows: 0,
        }
    }

    /// Rows written through this log.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_record(&mut self, record: &SpinRecord<'_>) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{HEADER}")?;
            self.header_written = true;
        }

        let k = &record.kinematics;
        write!(self.out, "{} {}", record.particle, record.time)?;
        for value in record
            .spin
            .iter()
            .chain(&k.position)
            .chain(&k.velocity)
            .chain(&record.field)
            .chain(&k.electric)
            .chain(k.electric_gradient.iter().flatten())
        {
            write!(self.out, " {value}")?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: f64) -> SpinRecord<'static> {
        SpinRecord {
            particle: "neutron",
            time,
            spin: [1.0, 0.0, 0.0],
            kinematics: KinematicSample {
                position: [0.1, 0.2, 0.3],
                velocity: [4.0, 5.0, 6.0],
                electric: [0.0, 0.0, 1e4],
                electric_gradient: [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
            },
            field: [0.0, 0.0, 5e-7],
        }
    }

    #[test]
    fn header_is_written_once() {
        let mut buffer = Vec::new();
        {
            let mut log = SpinLog::new(&mut buffer);
            log.write_record(&record(0.0)).expect("write");
            log.write_record(&record(1e-3)).expect("write");
            assert_eq!(log.rows(), 2);
        }
        let text = String::from_utf8(buffer).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.iter().filter(|l| l.starts_with("particle")).count(), 1);
    }

    #[test]
    fn row_columns_match_header() {
        let mut buffer = Vec::new();
        SpinLog::continuing(&mut buffer)
            .write_record(&record(0.5))
            .expect("write");
        let text = String::from_utf8(buffer).expect("utf8");
        let columns: Vec<&str> = text.trim_end().split(' ').collect();
        assert_eq!(columns.len(), HEADER.split_whitespace().count());
        assert_eq!(columns[0], "neutron");
        assert_eq!(columns[1], "0.5");
        assert_eq!(columns[2], "1");
        assert_eq!(columns[13], "0.0000005");
        assert_eq!(columns[16], "10000");
        assert_eq!(columns[25], "9");
    }
}
