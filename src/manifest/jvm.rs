use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use super::ManifestKind;
use crate::error::ManifestError;
use crate::model::{Dependency, Ecosystem};

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex is valid"))
        }
    };
}

static_regex!(comment_regex, r"(?s)<!--.*?-->");
static_regex!(properties_regex, r"(?s)<properties>(.*?)</properties>");
static_regex!(property_regex, r"<([A-Za-z0-9_.\-]+)>\s*([^<]*?)\s*</([A-Za-z0-9_.\-]+)>");
static_regex!(dependency_regex, r"(?s)<dependency>(.*?)</dependency>");
static_regex!(placeholder_regex, r"\$\{([^}]+)\}");
static_regex!(
    gradle_regex,
    r#"\b(?:implementation|api|compile|compileOnly|runtimeOnly|testImplementation|testCompile|testRuntimeOnly|annotationProcessor|kapt|classpath)\s*\(?\s*['"]([^:'"\s]+):([^:'"\s]+):([^:'"\s@]+)[^'"]*['"]"#
);

fn element<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim())
}

pub(super) fn parse_pom(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    if !content.contains("<project") {
        return Err(ManifestError::parse(
            manifest.display().to_string(),
            "missing <project> element",
        ));
    }
    let content = comment_regex().replace_all(content, "");

    let mut properties: HashMap<String, String> = properties_regex()
        .captures_iter(&content)
        .flat_map(|block| {
            property_regex()
                .captures_iter(block.get(1).map_or("", |m| m.as_str()))
                .filter(|c| c[1] == c[3])
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .collect::<Vec<_>>()
        })
        .collect();

    // The project's own version, ignoring the <parent> block and dependencies.
    let header = content
        .split("<dependencies>")
        .next()
        .unwrap_or_default();
    let header = match (header.find("<parent>"), header.find("</parent>")) {
        (Some(start), Some(end)) if start < end => format!("{}{}", &header[..start], &header[end..]),
        _ => header.to_string(),
    };
    if let Some(version) = element(&header, "version") {
        properties.insert("project.version".to_string(), version.to_string());
    }

    let resolve = |value: &str| -> String {
        placeholder_regex()
            .replace_all(value, |caps: &regex::Captures| {
                properties
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    };

    let deps = dependency_regex()
        .captures_iter(&content)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let group = resolve(element(body, "groupId")?);
            let artifact = resolve(element(body, "artifactId")?);
            let version = element(body, "version")
                .map(&resolve)
                .unwrap_or_else(|| "*".to_string());
            Some(Dependency::new(
                Ecosystem::Maven,
                format!("{group}:{artifact}"),
                version,
                manifest.to_path_buf(),
                ManifestKind::PomXml,
            ))
        })
        .collect();

    Ok(deps)
}

pub(super) fn parse_gradle(content: &str, manifest: &Path) -> Result<Vec<Dependency>, ManifestError> {
    let deps = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("//"))
        .flat_map(|line| gradle_regex().captures_iter(line).collect::<Vec<_>>())
        .map(|caps| {
            Dependency::new(
                Ecosystem::Maven,
                format!("{}:{}", &caps[1], &caps[2]),
                &caps[3],
                manifest.to_path_buf(),
                ManifestKind::BuildGradle,
            )
        })
        .collect();

    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <parent>
    <groupId>org.springframework.boot</groupId>
    <artifactId>spring-boot-starter-parent</artifactId>
    <version>2.7.0</version>
  </parent>
  <groupId>com.example</groupId>
  <artifactId>demo</artifactId>
  <version>1.4.0</version>
  <properties>
    <log4j.version>2.14.1</log4j.version>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.apache.logging.log4j</groupId>
      <artifactId>log4j-core</artifactId>
      <version>${log4j.version}</version>
    </dependency>
    <!-- <dependency><groupId>old</groupId><artifactId>gone</artifactId><version>1</version></dependency> -->
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>demo-api</artifactId>
      <version>${project.version}</version>
    </dependency>
    <dependency>
      <groupId>org.springframework.boot</groupId>
      <artifactId>spring-boot-starter-web</artifactId>
    </dependency>
    <dependency>
      <groupId>com.fasterxml.jackson.core</groupId>
      <artifactId>jackson-databind</artifactId>
      <version>${jackson.version}</version>
    </dependency>
  </dependencies>
</project>
"#;

    #[test]
    fn test_pom_dependencies_with_properties() {
        let deps = parse_pom(POM, Path::new("pom.xml")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();

        assert_eq!(
            found,
            vec![
                ("org.apache.logging.log4j:log4j-core", "2.14.1"),
                ("com.example:demo-api", "1.4.0"),
                ("org.springframework.boot:spring-boot-starter-web", "*"),
                ("com.fasterxml.jackson.core:jackson-databind", "${jackson.version}"),
            ]
        );
    }

    #[test]
    fn test_pom_unresolved_property_is_ambiguous() {
        let deps = parse_pom(POM, Path::new("pom.xml")).unwrap();
        assert!(deps[3].constraint().is_err());
    }

    #[test]
    fn test_pom_without_project_is_error() {
        assert!(parse_pom("<html></html>", Path::new("pom.xml")).is_err());
    }

    #[test]
    fn test_gradle_string_notations() {
        let content = r#"
plugins { id 'java' }
dependencies {
    implementation 'org.springframework:spring-core:5.3.18'
    api("com.google.guava:guava:31.1-jre")
    testImplementation "junit:junit:4.13.2"
    // implementation 'commented:out:1.0'
    runtimeOnly 'org.postgresql:postgresql:42.5.0@jar'
    implementation project(':core')
}
"#;
        let deps = parse_gradle(content, Path::new("build.gradle")).unwrap();
        let found: Vec<_> = deps
            .iter()
            .map(|d| (d.name.as_str(), d.declared_version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("org.springframework:spring-core", "5.3.18"),
                ("com.google.guava:guava", "31.1-jre"),
                ("junit:junit", "4.13.2"),
                ("org.postgresql:postgresql", "42.5.0"),
            ]
        );
        assert!(deps.iter().all(|d| d.ecosystem == Ecosystem::Maven));
    }
}
