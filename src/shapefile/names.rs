//! Shortens DBF field names to fit the 10-byte descriptor slot.
//!
//! A long name keeps its first 9 bytes and gains one suffix character,
//! `'0'..='9'` first, then `'A'..='Z'`. The first candidate that does not
//! collide (ASCII case-insensitively) with any other field's current name
//! wins. That allows at most 36 colliding truncations per prefix; a name that
//! finds no free suffix is reported as `None`.

pub const MAX_NAME_LEN: usize = 10;
const PREFIX_LEN: usize = 9;

fn suffixes() -> impl Iterator<Item=char> {
    (b'0'..=b'9').chain(b'A'..=b'Z').map(char::from)
}

/// Returns the longest prefix of `name` that is at most `max` bytes and ends
/// on a character boundary.
pub fn byte_prefix(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Shortens one long name at `index`, given the current names of every field.
///
/// On success `current[index]` is updated, so later fields see the short name.
fn truncate_long_name(current: &mut [String], index: usize) -> Option<String> {
    let prefix = byte_prefix(&current[index], PREFIX_LEN).to_string();

    for suffix in suffixes() {
        let candidate = format!("{}{}", prefix, suffix);
        let taken = current.iter()
            .enumerate()
            .any(|(i, other)| i != index && other.eq_ignore_ascii_case(&candidate));
        if !taken {
            current[index] = candidate.clone();
            return Some(candidate);
        }
    }

    None
}

/// Returns, for every input name, the name to write into the descriptor.
///
/// Names of at most 10 bytes are kept unchanged. Longer names are shortened
/// in field order; `None` marks a name whose 36 candidates were all taken.
pub fn shorten_names(names: &[String]) -> Vec<Option<String>> {
    let mut current: Vec<String> = names.to_vec();

    (0..names.len())
        .map(|i| {
            if names[i].len() > MAX_NAME_LEN {
                truncate_long_name(&mut current, i)
            } else {
                Some(names[i].clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_short_names_untouched() {
        assert_eq!(
            vec![ Some("NAME".to_string()), Some("POPULATION".to_string()) ],
            shorten_names(&names(&[ "NAME", "POPULATION" ]))
        );
    }

    #[test]
    fn test_digit_suffixes_first() {
        let out = shorten_names(&names(&[ "population_2010", "population_2020" ]));
        assert_eq!(Some("populatio0".to_string()), out[0]);
        assert_eq!(Some("populatio1".to_string()), out[1]);
    }

    #[test]
    fn test_collision_with_existing_short_name_is_case_insensitive() {
        let out = shorten_names(&names(&[ "POPULATIO0", "population_total" ]));
        assert_eq!(Some("POPULATIO0".to_string()), out[0]);
        assert_eq!(Some("populatio1".to_string()), out[1]);
    }

    #[test]
    fn test_letter_suffixes_after_digits() {
        let long: Vec<String> = (0..11).map(|i| format!("measurement_{:02}", i)).collect();
        let out = shorten_names(&long);
        assert_eq!(Some("measureme9".to_string()), out[9]);
        assert_eq!(Some("measuremeA".to_string()), out[10]);
    }

    #[test]
    fn test_budget_of_36() {
        let long: Vec<String> = (0..37).map(|i| format!("measurement_{:02}", i)).collect();
        let out = shorten_names(&long);
        assert_eq!(Some("measuremeZ".to_string()), out[35]);
        assert_eq!(None, out[36]);
    }

    #[test]
    fn test_multibyte_prefix_stays_on_char_boundary() {
        let out = shorten_names(&names(&[ "aaaaaaaaé_long" ]));
        assert_eq!(Some("aaaaaaaa0".to_string()), out[0]);
    }

    proptest! {
        #[test]
        fn prop_shortened_names_are_unique(
            prefix in "[a-zA-Z]{9}",
            tails in prop::collection::vec("[a-z0-9]{2,6}", 1..60)
        ) {
            let input: Vec<String> = tails.iter().map(|t| format!("{}{}", prefix, t)).collect();
            let out = shorten_names(&input);

            let mut seen = HashSet::new();
            for (i, name) in out.iter().enumerate() {
                match *name {
                    Some(ref n) => {
                        prop_assert!(n.len() <= MAX_NAME_LEN);
                        prop_assert!(seen.insert(n.to_ascii_uppercase()));
                    }
                    None => prop_assert!(i >= 36),
                }
            }
            prop_assert_eq!(input.len().min(36), seen.len());
        }

        #[test]
        fn prop_deterministic(input in prop::collection::vec("[a-zA-Z_]{1,16}", 0..40)) {
            prop_assert_eq!(shorten_names(&input), shorten_names(&input));
        }
    }
}
