use std::io::{self, Write};

use ahash::AHashMap;

/// Column (variable) kinds of a mixed-integer program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    Int,
    Bin,
    Cont,
}

/// Row (constraint) bound kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowType {
    /// Equality at the bound.
    Fix,
    /// Upper bound.
    Up,
    /// Lower bound.
    Lo,
}

/// Outcome taxonomy of a solve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveType {
    /// Proven optimal incumbent.
    Optim,
    /// An incumbent exists but is not proven optimal (timeout, or a
    /// write-only backend).
    NonOptim,
    /// Infeasible, unbounded or undefined.
    Inf,
}

/// Abstract surface of a mixed-integer backend: named columns and rows,
/// a coefficient matrix, a time limit, and value read-back. Concrete
/// solvers are optional; the program can always be serialised for an
/// external one.
pub trait IlpSolver {
    fn add_col(&mut self, name: &str, ty: ColType, obj_coef: f64) -> usize;
    fn add_row(&mut self, name: &str, bound: f64, ty: RowType) -> usize;
    fn add_col_to_row(&mut self, row: usize, col: usize, coef: f64);
    fn col_by_name(&self, name: &str) -> Option<usize>;
    fn set_obj_coef(&mut self, col: usize, coef: f64);
    fn set_time_limit(&mut self, secs: Option<u64>);
    fn solve(&mut self) -> SolveType;
    fn get_var_val(&self, col: usize) -> f64;
    fn get_obj_val(&self) -> f64;
    fn num_vars(&self) -> usize;
    fn num_constrs(&self) -> usize;

    /// Seed an initial feasible assignment (MIP warm start). Backends
    /// without warm-start support ignore it.
    fn set_start(&mut self, _values: &[f64]) {}

    /// Serialise the program as CPLEX LP text; backends writing through
    /// their own API may leave this a no-op.
    fn write_lp(&self, _w: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Col {
    name: String,
    ty: ColType,
    obj: f64,
}

#[derive(Debug, Clone)]
struct Row {
    name: String,
    bound: f64,
    ty: RowType,
    coefs: Vec<(usize, f64)>,
}

/// In-memory program builder whose `solve` does not compute: it keeps
/// whatever solution was injected (for read-back tests or an external
/// solver round trip) and reports `NonOptim`. `write_lp` serialises the
/// program in CPLEX LP text format.
#[derive(Debug, Clone, Default)]
pub struct LpModel {
    cols: Vec<Col>,
    rows: Vec<Row>,
    col_names: AHashMap<String, usize>,
    time_limit: Option<u64>,
    solution: Option<Vec<f64>>,
}

impl LpModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject variable values, e.g. parsed from an external solver run.
    pub fn set_solution(&mut self, values: Vec<f64>) {
        self.solution = Some(values);
    }

    pub fn has_solution(&self) -> bool {
        self.solution.is_some()
    }

    pub fn time_limit(&self) -> Option<u64> {
        self.time_limit
    }

    pub fn write_lp<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "\\ octilinear grid embedding")?;
        writeln!(w, "Minimize")?;
        write!(w, " obj:")?;
        let mut first = true;
        for c in &self.cols {
            if c.obj == 0.0 {
                continue;
            }
            if c.obj >= 0.0 && !first {
                write!(w, " +")?;
            }
            write!(w, " {} {}", c.obj, c.name)?;
            first = false;
        }
        if first {
            write!(w, " 0 {}", self.cols.first().map(|c| c.name.as_str()).unwrap_or("x0"))?;
        }
        writeln!(w)?;

        writeln!(w, "Subject To")?;
        for r in &self.rows {
            write!(w, " {}:", r.name)?;
            for (i, &(col, coef)) in r.coefs.iter().enumerate() {
                if coef >= 0.0 && i > 0 {
                    write!(w, " +")?;
                }
                write!(w, " {} {}", coef, self.cols[col].name)?;
            }
            let op = match r.ty {
                RowType::Fix => "=",
                RowType::Up => "<=",
                RowType::Lo => ">=",
            };
            writeln!(w, " {} {}", op, r.bound)?;
        }

        let bins: Vec<&str> = self
            .cols
            .iter()
            .filter(|c| c.ty == ColType::Bin)
            .map(|c| c.name.as_str())
            .collect();
        if !bins.is_empty() {
            writeln!(w, "Binary")?;
            for chunk in bins.chunks(8) {
                writeln!(w, " {}", chunk.join(" "))?;
            }
        }
        let ints: Vec<&str> = self
            .cols
            .iter()
            .filter(|c| c.ty == ColType::Int)
            .map(|c| c.name.as_str())
            .collect();
        if !ints.is_empty() {
            writeln!(w, "General")?;
            for chunk in ints.chunks(8) {
                writeln!(w, " {}", chunk.join(" "))?;
            }
        }
        writeln!(w, "End")?;
        Ok(())
    }
}

impl IlpSolver for LpModel {
    fn add_col(&mut self, name: &str, ty: ColType, obj_coef: f64) -> usize {
        let idx = self.cols.len();
        self.cols.push(Col {
            name: name.to_string(),
            ty,
            obj: obj_coef,
        });
        self.col_names.insert(name.to_string(), idx);
        idx
    }

    fn add_row(&mut self, name: &str, bound: f64, ty: RowType) -> usize {
        let idx = self.rows.len();
        self.rows.push(Row {
            name: name.to_string(),
            bound,
            ty,
            coefs: Vec::new(),
        });
        idx
    }

    fn add_col_to_row(&mut self, row: usize, col: usize, coef: f64) {
        self.rows[row].coefs.push((col, coef));
    }

    fn col_by_name(&self, name: &str) -> Option<usize> {
        self.col_names.get(name).copied()
    }

    fn set_obj_coef(&mut self, col: usize, coef: f64) {
        self.cols[col].obj = coef;
    }

    fn set_time_limit(&mut self, secs: Option<u64>) {
        self.time_limit = secs;
    }

    fn solve(&mut self) -> SolveType {
        SolveType::NonOptim
    }

    fn get_var_val(&self, col: usize) -> f64 {
        self.solution
            .as_ref()
            .and_then(|s| s.get(col).copied())
            .unwrap_or(0.0)
    }

    fn get_obj_val(&self) -> f64 {
        match &self.solution {
            Some(s) => self
                .cols
                .iter()
                .zip(s)
                .map(|(c, &v)| c.obj * v)
                .sum(),
            None => f64::INFINITY,
        }
    }

    fn num_vars(&self) -> usize {
        self.cols.len()
    }

    fn num_constrs(&self) -> usize {
        self.rows.len()
    }

    fn set_start(&mut self, values: &[f64]) {
        self.solution = Some(values.to_vec());
    }

    fn write_lp(&self, w: &mut dyn Write) -> io::Result<()> {
        LpModel::write_lp(self, w)
    }
}
