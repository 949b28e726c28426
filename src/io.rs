use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use phylotree::tree::Tree;
use serde::Serialize;

use crate::bootstrap::BootstrapSummary;
use crate::error::{Result, SesError};
use crate::matrix::{AbundanceMatrix, LabeledMatrix};
use crate::permtest::GroupTest;
use crate::ses::SesResult;
use crate::tree::cophenetic_matrix;

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Open a file for reading, transparently decompressing `.gz`.
fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    Ok(if is_gz(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Open a file for writing. `.gz` paths are gzip-compressed; `-` is stdout.
fn open_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout().lock())));
    }
    let f = File::create(path)?;
    Ok(if is_gz(path) {
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(f))
    })
}

fn parse_value(field: &str, line: usize) -> Result<f64> {
    match field.trim() {
        "" | "NA" | "NaN" | "nan" => Ok(f64::NAN),
        s => s.parse::<f64>().map_err(|_| SesError::Parse {
            line,
            message: format!("'{s}' is not a number"),
        }),
    }
}

/// A labeled TSV table: column labels from the header, row labels from the first column.
struct Table {
    columns: Vec<String>,
    rows: Vec<String>,
    values: Vec<Vec<f64>>,
}

fn read_table<R: BufRead>(reader: R) -> Result<Table> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, l)| l.map(|l| (i + 1, l)))
        .filter(|r| r.as_ref().map_or(true, |(_, l)| !l.trim().is_empty()));

    let (_, header) = lines.next().transpose()?.ok_or_else(|| SesError::Parse {
        line: 1,
        message: "empty table".to_string(),
    })?;
    // the first header cell names the row labels (often blank) and is skipped
    let columns: Vec<String> = header
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .skip(1)
        .map(|s| s.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    let mut values = Vec::new();
    for line in lines {
        let (n, line) = line?;
        let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
        let label = fields.next().unwrap_or_default().trim().to_string();
        let row = fields.map(|f| parse_value(f, n)).collect::<Result<Vec<f64>>>()?;
        if row.len() != columns.len() {
            return Err(SesError::Parse {
                line: n,
                message: format!("expected {} values, found {}", columns.len(), row.len()),
            });
        }
        rows.push(label);
        values.push(row);
    }
    Ok(Table { columns, rows, values })
}

/// Read a samples × taxa abundance table (TSV, optionally gzipped).
pub fn read_abundance_tsv<P: AsRef<Path>>(path: P) -> Result<AbundanceMatrix> {
    let t = read_table(open_reader(path.as_ref())?)?;
    AbundanceMatrix::new(t.rows, t.columns, t.values)
}

/// Read a square labeled matrix (TSV, optionally gzipped).
///
/// Rows are reordered to follow the column order when both list the same labels.
pub fn read_square_tsv<P: AsRef<Path>>(path: P) -> Result<LabeledMatrix> {
    let t = read_table(open_reader(path.as_ref())?)?;
    if t.rows == t.columns {
        return LabeledMatrix::new(t.columns, t.values);
    }
    let by_row: HashMap<&str, &Vec<f64>> = t.rows.iter().map(String::as_str).zip(&t.values).collect();
    if t.rows.len() != t.columns.len() || by_row.len() != t.rows.len() {
        return Err(SesError::InvalidMatrix("row and column labels differ".to_string()));
    }
    let values = t
        .columns
        .iter()
        .map(|c| {
            by_row
                .get(c.as_str())
                .map(|r| (*r).clone())
                .ok_or_else(|| SesError::InvalidMatrix(format!("column '{c}' has no matching row")))
        })
        .collect::<Result<Vec<_>>>()?;
    LabeledMatrix::new(t.columns, values)
}

/// Read `sample<TAB>group` lines. A first line whose first field is `sample` is a header.
pub fn read_groups_tsv<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for (i, line) in open_reader(path.as_ref())?.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let first = parts.next();
        if i == 0 && first.is_some_and(|f| f.trim().eq_ignore_ascii_case("sample")) {
            continue;
        }
        match (first, parts.next()) {
            (Some(s), Some(g)) => {
                map.insert(s.trim().to_string(), g.trim().to_string());
            }
            _ => {
                return Err(SesError::Parse {
                    line: i + 1,
                    message: "expected 'sample<TAB>group'".to_string(),
                });
            }
        }
    }
    Ok(map)
}

/// Strip BEAST annotations (`[&rate=0.1]`) from a Newick string, keeping branch lengths.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

/// Read a tree and return its cophenetic distance matrix.
///
/// Plain Newick files hold one tree. NEXUS files (`#NEXUS` header) use the
/// first `TREE` of the `TREES` block, with tips renamed through the
/// `TRANSLATE` table when one is present.
pub fn read_tree_distances<P: AsRef<Path>>(path: P) -> Result<LabeledMatrix> {
    let mut content = String::new();
    open_reader(path.as_ref())?.read_to_string(&mut content)?;

    let (newick, translate) = if content.trim_start().to_ascii_uppercase().starts_with("#NEXUS") {
        let body = first_nexus_tree(&content).ok_or_else(|| SesError::Tree("no TREE found in NEXUS file".to_string()))?;
        (body, parse_translate_block(&content))
    } else {
        (content.trim().to_string(), HashMap::new())
    };

    let mut tree = Tree::from_newick(&strip_beast_annotations(&newick))
        .map_err(|e| SesError::Tree(format!("failed to parse {}: {e}", path.as_ref().display())))?;
    if !translate.is_empty() {
        rename_leaf_nodes(&mut tree, &translate);
    }
    cophenetic_matrix(&tree)
}

fn first_nexus_tree(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find(|line| line.to_ascii_uppercase().starts_with("TREE "))
        .and_then(|line| line.split_once('='))
        .map(|(_, body)| body.trim().to_string())
}

fn parse_translate_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // 1 'Acer_rubrum',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches([',', ';']);
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect()
}

fn rename_leaf_nodes(tree: &mut Tree, translate: &HashMap<String, String>) {
    for leaf_id in tree.get_leaves() {
        if let Ok(node) = tree.get_mut(&leaf_id) {
            if let Some(label) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(label.clone());
            }
        }
    }
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() { "NA".to_string() } else { v.to_string() }
}

/// Write a labeled square matrix as TSV. NA cells are written as `NA`.
/// If `path` ends with `.gz`, the output is gzip-compressed; `-` writes to stdout.
pub fn write_matrix_tsv<P: AsRef<Path>>(path: P, mat: &LabeledMatrix) -> Result<()> {
    let mut out = open_writer(path.as_ref())?;

    for name in &mat.labels {
        write!(&mut out, "\t{name}")?;
    }
    writeln!(&mut out)?;

    for (name, row) in mat.labels.iter().zip(&mat.values) {
        write!(&mut out, "{name}")?;
        for &val in row {
            write!(&mut out, "\t{}", fmt_value(val))?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

/// Write every matrix of an SES result as `<prefix>.<name>.tsv` (plus `.gz`
/// when `gzip`), and the richness vector as `<prefix>.richness.tsv`.
pub fn write_ses_result(prefix: &str, res: &SesResult, gzip: bool) -> Result<Vec<String>> {
    let ext = if gzip { "tsv.gz" } else { "tsv" };
    let mut written = Vec::new();
    for (name, mat) in res.matrices() {
        let path = format!("{prefix}.{name}.{ext}");
        write_matrix_tsv(&path, mat)?;
        written.push(path);
    }

    let path = format!("{prefix}.richness.tsv");
    let mut out = open_writer(Path::new(&path))?;
    writeln!(&mut out, "sample\tntaxa\truns")?;
    for (s, r) in res.samples.iter().zip(&res.richness) {
        writeln!(&mut out, "{s}\t{r}\t{}", res.runs)?;
    }
    out.flush()?;
    written.push(path);
    Ok(written)
}

/// Rows that can be written as a TSV table.
pub trait TableRow {
    fn header(&self) -> Vec<String>;
    fn cells(&self) -> Vec<String>;
}

impl TableRow for GroupTest {
    fn header(&self) -> Vec<String> {
        ["group_a", "group_b", "kind", "n_cells", "mean_z", "permutations", "p_value"]
            .map(String::from)
            .to_vec()
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.group_a.clone(),
            self.group_b.clone(),
            self.kind.as_str().to_string(),
            self.n_cells.to_string(),
            fmt_value(self.mean_z),
            self.permutations.to_string(),
            fmt_value(self.p_value),
        ]
    }
}

impl TableRow for BootstrapSummary {
    fn header(&self) -> Vec<String> {
        let mut h: Vec<String> = ["group_a", "group_b", "kind", "n_cells", "mean_z"].map(String::from).to_vec();
        h.extend(self.quantiles.iter().map(|q| format!("q{}%", q.prob * 100.0)));
        h.extend(["boot_sd", "p_value", "p_adjusted", "frac_opposite", "resamples"].map(String::from));
        h
    }

    fn cells(&self) -> Vec<String> {
        let mut c = vec![
            self.group_a.clone(),
            self.group_b.clone(),
            self.kind.as_str().to_string(),
            self.n_cells.to_string(),
            fmt_value(self.mean_z),
        ];
        c.extend(self.quantiles.iter().map(|q| fmt_value(q.value)));
        c.extend([
            fmt_value(self.boot_sd),
            fmt_value(self.p_value),
            fmt_value(self.p_adjusted),
            fmt_value(self.frac_opposite),
            self.resamples.to_string(),
        ]);
        c
    }
}

/// Write result rows as JSON (path ends with `.json`) or TSV otherwise.
pub fn write_table<P: AsRef<Path>, T: TableRow + Serialize>(path: P, rows: &[T]) -> Result<()> {
    let p = path.as_ref();
    if p.to_string_lossy().ends_with(".json") {
        fs::write(p, serde_json::to_string_pretty(rows)?)?;
        return Ok(());
    }

    let mut out = open_writer(p)?;
    if let Some(first) = rows.first() {
        writeln!(&mut out, "{}", first.header().join("\t"))?;
    }
    for row in rows {
        writeln!(&mut out, "{}", row.cells().join("\t"))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn parses_table_with_na_and_blank_lines() {
        let text = "\ta\tb\ns1\t1\tNA\n\ns2\t0\t2.5\n";
        let t = read_table(Cursor::new(text)).unwrap();
        assert_eq!(t.columns, vec!["a", "b"]);
        assert_eq!(t.rows, vec!["s1", "s2"]);
        assert!(t.values[0][1].is_nan());
        assert_eq!(t.values[1][1], 2.5);
    }

    #[test]
    fn ragged_row_is_a_parse_error() {
        let err = read_table(Cursor::new("x\ta\tb\ns1\t1\n")).err().unwrap();
        assert!(matches!(err, SesError::Parse { line: 2, .. }));
        let err = read_table(Cursor::new("x\ta\ns1\tabc\n")).err().unwrap();
        assert!(matches!(err, SesError::Parse { .. }));
    }

    #[test]
    fn matrix_roundtrip_through_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("z.tsv.gz");
        let m = LabeledMatrix::new(
            vec!["s1".into(), "s2".into()],
            vec![vec![f64::NAN, -1.5], vec![-1.5, f64::NAN]],
        )
        .unwrap();
        write_matrix_tsv(&path, &m).unwrap();
        let back = read_square_tsv(&path).unwrap();
        assert_eq!(back.labels, m.labels);
        assert_eq!(back.get(0, 1), -1.5);
        assert!(back.get(1, 1).is_nan());
    }

    #[test]
    fn square_rows_are_reordered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.tsv");
        fs::write(&path, "\ta\tb\nb\t1\t0\na\t0\t1\n").unwrap();
        let m = read_square_tsv(&path).unwrap();
        assert_eq!(m.labels, vec!["a", "b"]);
        assert_eq!(m.values, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn groups_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.tsv");
        fs::write(&path, "sample\tgroup\ns1\tforest\ns2\tmeadow\n").unwrap();
        let g = read_groups_tsv(&path).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g["s2"], "meadow");
    }

    #[test]
    fn groups_without_header_keep_first_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.tsv");
        fs::write(&path, "sample1\tforest\nsample2\tmeadow\n").unwrap();
        let g = read_groups_tsv(&path).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g["sample1"], "forest");

        fs::write(&path, "SAMPLE\tgroup\nsamples_A\tx\n").unwrap();
        let g = read_groups_tsv(&path).unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(g["samples_A"], "x");
    }

    #[test]
    fn nexus_tree_with_translate_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.nex");
        let nexus = "#NEXUS\nBEGIN TREES;\n\tTRANSLATE\n\t\t1 'Acer',\n\t\t2 'Betula',\n\t\t3 'Carex'\n\t\t;\n\
                     TREE tree_1 = ((1:[&rate=0.5]1.0,2:1.0):1.0,3:2.0);\nEND;\n";
        fs::write(&path, nexus).unwrap();
        let m = read_tree_distances(&path).unwrap();
        assert_eq!(m.labels, vec!["Acer", "Betula", "Carex"]);
        assert!((m.get(0, 1) - 2.0).abs() < 1e-12);
        assert!((m.get(0, 2) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn strip_annotations() {
        assert_eq!(strip_beast_annotations("(A:[&rate=1]0.5,B:0.5);"), "(A:0.5,B:0.5);");
    }
}
