use crate::config::ImportProfile;
use crate::model::{fold, CanonicalEntity, CellValue, ImportRow, MatchVia, Resolution};

/// Find the canonical entity a row belongs to.
///
/// Order: explicit foreign key, then case-insensitive name, then secondary
/// attribute narrowing. Never fails: an unresolvable collision returns the
/// first candidate flagged `ambiguous`.
pub fn resolve<'a>(
    row: &ImportRow,
    canonical: &'a [CanonicalEntity],
    profile: &ImportProfile,
) -> Resolution<'a> {
    if let Some(key) = row.foreign_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        if let Some(entity) = canonical.iter().find(|e| e.id == key) {
            return Resolution::exact(entity, MatchVia::ForeignKey);
        }
        log::debug!("foreign key '{key}' not in canonical set, matching by name");
    }

    let Some(name) = row.cell(&profile.name_column) else {
        return Resolution::unmatched();
    };
    let name = fold(&name.to_string());

    let candidates: Vec<&CanonicalEntity> =
        canonical.iter().filter(|e| fold(&e.name) == name).collect();

    match candidates.len() {
        0 => Resolution::unmatched(),
        1 => Resolution::exact(candidates[0], MatchVia::Name),
        _ => disambiguate(row, candidates, &profile.secondary),
    }
}

/// Narrow same-named candidates by secondary attributes.
///
/// The full tuple is tried first, then each attribute alone. A filter that
/// leaves several candidates narrows the set; one that leaves none is ignored.
/// Filters the row has no value for are skipped.
pub fn disambiguate<'a>(
    row: &ImportRow,
    mut candidates: Vec<&'a CanonicalEntity>,
    secondary: &[String],
) -> Resolution<'a> {
    let wanted: Vec<(&str, &CellValue)> = secondary
        .iter()
        .filter_map(|attr| row.cell(attr).map(|v| (attr.as_str(), v)))
        .collect();

    if !secondary.is_empty() && wanted.len() == secondary.len() {
        let survivors = filter_by(&candidates, &wanted);
        if let Some(found) = narrow(&mut candidates, survivors, MatchVia::SecondaryTuple) {
            return found;
        }
    }

    for &(attr, value) in &wanted {
        let survivors = filter_by(&candidates, &[(attr, value)]);
        if let Some(found) = narrow(&mut candidates, survivors, MatchVia::Secondary(attr.to_string())) {
            return found;
        }
    }

    log::debug!(
        "{} candidates still tied after disambiguation, taking the first",
        candidates.len()
    );
    Resolution {
        entity: candidates.first().copied(),
        ambiguous: true,
        via: MatchVia::Fallback,
    }
}

fn filter_by<'a>(
    candidates: &[&'a CanonicalEntity],
    wanted: &[(&str, &CellValue)],
) -> Vec<&'a CanonicalEntity> {
    candidates
        .iter()
        .filter(|entity| {
            wanted.iter().all(|(attr, value)| {
                entity.attribute(attr).is_some_and(|have| have.loosely_eq(value))
            })
        })
        .copied()
        .collect()
}

fn narrow<'a>(
    candidates: &mut Vec<&'a CanonicalEntity>,
    survivors: Vec<&'a CanonicalEntity>,
    via: MatchVia,
) -> Option<Resolution<'a>> {
    match survivors.len() {
        0 => None,
        1 => Some(Resolution::exact(survivors[0], via)),
        _ => {
            *candidates = survivors;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ImportProfile {
        let mut p = ImportProfile::new("test", "driver");
        p.secondary = vec!["plate".into(), "company".into()];
        p
    }

    fn rossi_pair() -> Vec<CanonicalEntity> {
        vec![
            CanonicalEntity::new("a1", "Mario Rossi")
                .with("plate", "AB123CD")
                .with("company", "Acme"),
            CanonicalEntity::new("a2", "Mario Rossi")
                .with("plate", "EF456GH")
                .with("company", "Acme"),
            CanonicalEntity::new("a3", "Luca Bianchi").with("plate", "ZZ999ZZ"),
        ]
    }

    #[test]
    fn foreign_key_short_circuits() {
        let set = rossi_pair();
        let row = ImportRow::new()
            .with("driver", "Someone Else")
            .with_foreign_key("a2");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a2"));
        assert!(!res.ambiguous);
        assert_eq!(res.via, MatchVia::ForeignKey);
    }

    #[test]
    fn unknown_foreign_key_falls_back_to_name() {
        let set = rossi_pair();
        let row = ImportRow::new()
            .with("driver", "luca bianchi")
            .with_foreign_key("gone");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a3"));
        assert_eq!(res.via, MatchVia::Name);
    }

    #[test]
    fn unique_name_is_case_insensitive() {
        let set = rossi_pair();
        let row = ImportRow::new().with("driver", "  LUCA BIANCHI ");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a3"));
        assert!(!res.ambiguous);
    }

    #[test]
    fn no_name_match() {
        let set = rossi_pair();
        let row = ImportRow::new().with("driver", "Giulia Verdi");
        let res = resolve(&row, &set, &profile());
        assert!(res.entity.is_none());
        assert!(!res.ambiguous);
        assert_eq!(res.via, MatchVia::NoMatch);
    }

    #[test]
    fn blank_name_matches_nothing() {
        let set = vec![CanonicalEntity::new("e", "")];
        let row = ImportRow::new().with("driver", "   ");
        assert!(resolve(&row, &set, &profile()).entity.is_none());
    }

    #[test]
    fn collision_resolved_by_single_attribute() {
        let set = rossi_pair();
        let row = ImportRow::new()
            .with("driver", "Mario Rossi")
            .with("plate", "ab123cd");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a1"));
        assert!(!res.ambiguous);
        assert_eq!(res.via, MatchVia::Secondary("plate".into()));
    }

    #[test]
    fn collision_resolved_by_full_tuple() {
        let set = rossi_pair();
        let row = ImportRow::new()
            .with("driver", "Mario Rossi")
            .with("plate", "EF456GH")
            .with("company", "ACME");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a2"));
        assert_eq!(res.via, MatchVia::SecondaryTuple);
    }

    #[test]
    fn unresolved_collision_takes_first_in_input_order() {
        let set = rossi_pair();
        let row = ImportRow::new().with("driver", "Mario Rossi");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a1"));
        assert!(res.ambiguous);
        assert_eq!(res.via, MatchVia::Fallback);
    }

    #[test]
    fn shared_attribute_does_not_break_tie() {
        let set = rossi_pair();
        let row = ImportRow::new()
            .with("driver", "Mario Rossi")
            .with("company", "Acme");
        let res = resolve(&row, &set, &profile());
        assert!(res.ambiguous);
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("a1"));
    }

    #[test]
    fn later_attribute_decides_within_narrowed_set() {
        let set = vec![
            CanonicalEntity::new("b1", "Anna Neri").with("plate", "X1").with("company", "North"),
            CanonicalEntity::new("b2", "Anna Neri").with("plate", "X2").with("company", "South"),
            CanonicalEntity::new("b3", "Anna Neri").with("plate", "X3").with("company", "South"),
        ];
        // plate unknown to the set: tuple and plate filters match nothing,
        // company picks b1.
        let row = ImportRow::new()
            .with("driver", "Anna Neri")
            .with("plate", "X9")
            .with("company", "North");
        let res = resolve(&row, &set, &profile());
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("b1"));
        assert_eq!(res.via, MatchVia::Secondary("company".into()));
    }

    #[test]
    fn empty_filter_result_keeps_candidates() {
        let set = vec![
            CanonicalEntity::new("c1", "Paolo Blu").with("company", "South"),
            CanonicalEntity::new("c2", "Paolo Blu").with("company", "South"),
        ];
        let row = ImportRow::new()
            .with("driver", "Paolo Blu")
            .with("plate", "NOPE");
        let res = resolve(&row, &set, &profile());
        assert!(res.ambiguous);
        assert_eq!(res.entity.map(|e| e.id.as_str()), Some("c1"));
    }
}
