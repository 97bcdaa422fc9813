#[derive(Debug)]
pub struct Heading {
    pub depth: usize,
    pub content: String,
}

impl Heading {
    pub fn try_parse(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        let depth = trimmed.chars().take_while(|ch| *ch == '#').count();

        if depth == 0 || depth > 6 {
            return None;
        }

        // A hash run without a following space is a tag, not a heading.
        let rest = &trimmed[depth..];
        if !rest.is_empty() && !rest.starts_with(' ') {
            return None;
        }

        Some(Self {
            depth,
            content: rest.trim().to_owned(),
        })
    }
}
