use indexmap::IndexMap;

/// Short name for a matrix configuration such as
/// `architecture=i386,platform=ubuntu-14.04,project=chef,role=builder`.
///
/// Builders and testers are named by platform (plus architecture unless it
/// is `x86_64`); anything else keeps its full configuration string.
pub fn configuration_summary(configuration: &str) -> String {
    let values: IndexMap<&str, &str> = configuration
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .collect();

    match values.get("role") {
        Some(&"builder" | &"tester") => {
            let mut summary = values.get("platform").copied().unwrap_or_default().to_string();
            if let Some(architecture) = values.get("architecture").filter(|a| **a != "x86_64") {
                summary.push('-');
                summary.push_str(architecture);
            }
            summary
        }
        _ => configuration.to_string(),
    }
}

/// Collapses failed configurations into the groups they fill completely.
///
/// Groups are tried in order: `all` (except `acceptance`), `unix`, `linux`,
/// `bsd`, then each OS family (the name up to the first `-`). When every
/// member of a group failed, the members are replaced by the group name.
pub fn categorize_run_types(failed: &[String], all: &[String]) -> Vec<String> {
    let mut families: IndexMap<&str, Vec<&String>> = IndexMap::new();
    for configuration in all {
        let family = configuration.split('-').next().unwrap_or(configuration);
        families.entry(family).or_default().push(configuration);
    }
    let mut categories: Vec<(String, Vec<&String>)> = vec![
        ("all".to_string(), all.iter().filter(|c| *c != "acceptance").collect()),
        ("unix".to_string(), members(&families, |family| family != "windows")),
        (
            "linux".to_string(),
            members(&families, |family| {
                !matches!(family, "aix" | "solaris" | "windows") && !family.contains("bsd")
            }),
        ),
        ("bsd".to_string(), members(&families, |family| family.contains("bsd"))),
    ];
    for (family, configurations) in &families {
        categories.push(((*family).to_string(), configurations.clone()));
    }

    let mut result: Vec<String> = failed.to_vec();
    for (category, configurations) in categories {
        if configurations.is_empty() {
            continue;
        }
        if configurations.iter().all(|c| result.contains(*c)) {
            result.retain(|c| !configurations.contains(&c));
            result.push(category);
        }
    }
    result.sort();
    result.dedup();
    result
}

fn members<'a>(families: &IndexMap<&str, Vec<&'a String>>, keep: impl Fn(&str) -> bool) -> Vec<&'a String> {
    families
        .iter()
        .filter(|(family, _)| keep(family))
        .flat_map(|(_, configurations)| configurations.iter().copied())
        .collect()
}
