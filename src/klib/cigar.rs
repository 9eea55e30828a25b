use std::fmt;
use std::str::FromStr;

/// Alignment operators. Only M, I and D drive any logic in this crate; the
/// rest exist so that externally produced alignments round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    M,
    I,
    D,
    N,
    S,
    H,
    P,
    Eq,
    X,
}

impl CigarOp {
    pub fn consumes_read_bases(self) -> bool {
        matches!(self, CigarOp::M | CigarOp::I | CigarOp::S | CigarOp::Eq | CigarOp::X)
    }

    pub fn consumes_reference_bases(self) -> bool {
        matches!(self, CigarOp::M | CigarOp::D | CigarOp::N | CigarOp::Eq | CigarOp::X)
    }

    pub fn as_char(self) -> char {
        match self {
            CigarOp::M => 'M',
            CigarOp::I => 'I',
            CigarOp::D => 'D',
            CigarOp::N => 'N',
            CigarOp::S => 'S',
            CigarOp::H => 'H',
            CigarOp::P => 'P',
            CigarOp::Eq => '=',
            CigarOp::X => 'X',
        }
    }

    pub fn from_char(c: char) -> Option<CigarOp> {
        match c {
            'M' => Some(CigarOp::M),
            'I' => Some(CigarOp::I),
            'D' => Some(CigarOp::D),
            'N' => Some(CigarOp::N),
            'S' => Some(CigarOp::S),
            'H' => Some(CigarOp::H),
            'P' => Some(CigarOp::P),
            '=' => Some(CigarOp::Eq),
            'X' => Some(CigarOp::X),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarElement {
    pub op: CigarOp,
    pub len: usize,
}

impl CigarElement {
    pub fn new(op: CigarOp, len: usize) -> Self {
        CigarElement { op, len }
    }
}

/// A run-length encoded alignment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cigar {
    elements: Vec<CigarElement>,
}

impl Cigar {
    pub fn new(elements: Vec<CigarElement>) -> Self {
        Cigar { elements }
    }

    pub fn elements(&self) -> &[CigarElement] {
        &self.elements
    }

    pub fn push(&mut self, element: CigarElement) {
        self.elements.push(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn first(&self) -> Option<&CigarElement> {
        self.elements.first()
    }

    pub fn last(&self) -> Option<&CigarElement> {
        self.elements.last()
    }

    /// Number of reference bases the alignment spans.
    pub fn reference_length(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.op.consumes_reference_bases())
            .map(|e| e.len)
            .sum()
    }

    /// Number of read bases the alignment spans.
    pub fn read_length(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| e.op.consumes_read_bases())
            .map(|e| e.len)
            .sum()
    }

    /// Merge adjacent equal operators and drop zero-length elements.
    pub fn consolidated(&self) -> Cigar {
        let mut elements: Vec<CigarElement> = Vec::with_capacity(self.elements.len());
        for &e in &self.elements {
            if e.len == 0 {
                continue;
            }
            match elements.last_mut() {
                Some(last) if last.op == e.op => last.len += e.len,
                _ => elements.push(e),
            }
        }
        Cigar { elements }
    }

    /// Drop a terminal deletion. Leading deletions are kept.
    pub fn without_trailing_deletions(&self) -> Cigar {
        match self.elements.last() {
            Some(e) if e.op == CigarOp::D => {
                Cigar::new(self.elements[..self.elements.len() - 1].to_vec())
            }
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.elements {
            write!(f, "{}{}", e.len, e.op.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut elements = Vec::new();
        let mut len = 0usize;
        let mut saw_digit = false;
        for c in s.chars() {
            if let Some(d) = c.to_digit(10) {
                len = len * 10 + d as usize;
                saw_digit = true;
            } else {
                let op = CigarOp::from_char(c).ok_or_else(|| format!("bad cigar operator {c}"))?;
                if !saw_digit {
                    return Err(format!("operator {c} without a length in {s}"));
                }
                elements.push(CigarElement::new(op, len));
                len = 0;
                saw_digit = false;
            }
        }
        if saw_digit {
            return Err(format!("trailing length without an operator in {s}"));
        }
        Ok(Cigar::new(elements))
    }
}
