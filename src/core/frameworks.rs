//! Framework catalogue and supported language pairs
//!
//! Target frameworks are validated against this catalogue before a
//! conversion job is created. Every language lists a `none` entry.

use serde::Serialize;

/// A framework that can be named as source or target framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Framework {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

const fn fw(name: &'static str, label: &'static str, description: &'static str) -> Framework {
    Framework {
        name,
        label,
        description,
    }
}

static CATALOGUE: &[(&str, &[Framework])] = &[
    (
        "java",
        &[
            fw("spring", "Spring Framework", "Enterprise Java framework"),
            fw("spring_boot", "Spring Boot", "Rapid application development with Spring"),
            fw("jakarta_ee", "Jakarta EE", "Enterprise Java platform"),
            fw("micronaut", "Micronaut", "Modern JVM framework"),
            fw("quarkus", "Quarkus", "Supersonic Subatomic Java"),
            fw("play", "Play Framework", "Web framework for Java and Scala"),
            fw("struts", "Apache Struts", "MVC framework for Java"),
            fw("jsf", "JavaServer Faces", "Component-based UI framework"),
            fw("vaadin", "Vaadin", "Web application framework"),
            fw("none", "No Framework", "Plain Java without framework"),
        ],
    ),
    (
        "python",
        &[
            fw("django", "Django", "High-level Python web framework"),
            fw("flask", "Flask", "Lightweight web framework"),
            fw("fastapi", "FastAPI", "Modern, fast web framework"),
            fw("pyramid", "Pyramid", "Flexible Python web framework"),
            fw("tornado", "Tornado", "Asynchronous web framework"),
            fw("bottle", "Bottle", "Fast and simple WSGI framework"),
            fw("cherrypy", "CherryPy", "Object-oriented web framework"),
            fw("web2py", "web2py", "Full-stack web framework"),
            fw("aiohttp", "aiohttp", "Async HTTP client/server framework"),
            fw("none", "No Framework", "Plain Python without framework"),
        ],
    ),
    (
        "javascript",
        &[
            fw("react", "React", "JavaScript library for building user interfaces"),
            fw("vue", "Vue.js", "Progressive JavaScript framework"),
            fw("angular", "Angular", "Platform for building mobile and desktop web applications"),
            fw("express", "Express.js", "Fast, unopinionated web framework"),
            fw("next", "Next.js", "React framework for production"),
            fw("nuxt", "Nuxt.js", "Vue.js framework for production"),
            fw("svelte", "Svelte", "Cybernetically enhanced web apps"),
            fw("ember", "Ember.js", "A framework for ambitious web developers"),
            fw("backbone", "Backbone.js", "Give your JS App some backbone"),
            fw("jquery", "jQuery", "JavaScript library"),
            fw("none", "No Framework", "Plain JavaScript without framework"),
        ],
    ),
    (
        "typescript",
        &[
            fw("react", "React with TypeScript", "React with TypeScript support"),
            fw("vue", "Vue.js with TypeScript", "Vue.js with TypeScript support"),
            fw("angular", "Angular", "Platform for building mobile and desktop web applications"),
            fw("next", "Next.js with TypeScript", "Next.js with TypeScript support"),
            fw("nuxt", "Nuxt.js with TypeScript", "Nuxt.js with TypeScript support"),
            fw("svelte", "Svelte with TypeScript", "Svelte with TypeScript support"),
            fw("express", "Express.js with TypeScript", "Express.js with TypeScript support"),
            fw("nest", "NestJS", "Progressive Node.js framework"),
            fw("none", "No Framework", "Plain TypeScript without framework"),
        ],
    ),
    (
        "cobol",
        &[
            fw("cics", "CICS", "Customer Information Control System"),
            fw("ims", "IMS", "Information Management System"),
            fw("db2", "DB2", "Database management system"),
            fw("jcl", "JCL", "Job Control Language"),
            fw("none", "No Framework", "Plain COBOL without framework"),
        ],
    ),
    (
        "cpp",
        &[
            fw("qt", "Qt", "Cross-platform application framework"),
            fw("boost", "Boost", "Collection of peer-reviewed portable C++ source libraries"),
            fw("stl", "STL", "Standard Template Library"),
            fw("mfc", "MFC", "Microsoft Foundation Classes"),
            fw("wxwidgets", "wxWidgets", "Cross-platform GUI library"),
            fw("none", "No Framework", "Plain C++ without framework"),
        ],
    ),
    (
        "csharp",
        &[
            fw("asp_net", "ASP.NET", "Web application framework"),
            fw("asp_net_core", "ASP.NET Core", "Cross-platform web framework"),
            fw("wpf", "WPF", "Windows Presentation Foundation"),
            fw("winforms", "Windows Forms", "Desktop application framework"),
            fw("xamarin", "Xamarin", "Cross-platform mobile development"),
            fw("blazor", "Blazor", "Web framework using C# and HTML"),
            fw("none", "No Framework", "Plain C# without framework"),
        ],
    ),
    (
        "php",
        &[
            fw("laravel", "Laravel", "PHP web application framework"),
            fw("symfony", "Symfony", "PHP web application framework"),
            fw("codeigniter", "CodeIgniter", "PHP framework"),
            fw("yii", "Yii", "High-performance PHP framework"),
            fw("cakephp", "CakePHP", "Rapid development framework"),
            fw("zend", "Zend Framework", "Enterprise PHP framework"),
            fw("slim", "Slim", "PHP micro-framework"),
            fw("none", "No Framework", "Plain PHP without framework"),
        ],
    ),
    (
        "ruby",
        &[
            fw("rails", "Ruby on Rails", "Web application framework"),
            fw("sinatra", "Sinatra", "Lightweight web framework"),
            fw("hanami", "Hanami", "Modern Ruby web framework"),
            fw("grape", "Grape", "REST-like API framework"),
            fw("none", "No Framework", "Plain Ruby without framework"),
        ],
    ),
    (
        "go",
        &[
            fw("gin", "Gin", "HTTP web framework"),
            fw("echo", "Echo", "High performance web framework"),
            fw("fiber", "Fiber", "Express inspired web framework"),
            fw("revel", "Revel", "Full-stack web framework"),
            fw("beego", "Beego", "Full-stack web framework"),
            fw("none", "No Framework", "Plain Go without framework"),
        ],
    ),
    (
        "rust",
        &[
            fw("actix", "Actix", "Powerful web framework"),
            fw("rocket", "Rocket", "Web framework for Rust"),
            fw("warp", "Warp", "Fast web framework"),
            fw("axum", "Axum", "Web application framework"),
            fw("none", "No Framework", "Plain Rust without framework"),
        ],
    ),
];

/// Source language -> target languages it can be converted to. Same-language
/// targets mean modernization.
static CONVERSIONS: &[(&str, &[&str])] = &[
    ("python", &["python", "java", "javascript", "typescript", "go", "rust"]),
    ("java", &["java", "python", "javascript", "typescript", "go", "rust"]),
    ("javascript", &["javascript", "python", "java", "typescript", "go", "rust"]),
    ("typescript", &["typescript", "python", "java", "javascript", "go", "rust"]),
    ("cobol", &["cobol", "python", "java", "javascript", "typescript"]),
    ("cpp", &["cpp", "python", "java", "javascript", "typescript", "go", "rust"]),
    ("c", &["c", "python", "java", "javascript", "typescript", "go", "rust"]),
    ("php", &["php", "python", "java", "javascript", "typescript"]),
    ("ruby", &["ruby", "python", "java", "javascript", "typescript"]),
    ("go", &["go", "python", "java", "javascript", "typescript", "rust"]),
    ("rust", &["rust", "python", "java", "javascript", "typescript", "go"]),
];

/// Frameworks for a language (case-insensitive); empty when unknown
pub fn frameworks_for(language: &str) -> &'static [Framework] {
    CATALOGUE
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case(language))
        .map(|(_, frameworks)| *frameworks)
        .unwrap_or(&[])
}

/// Languages with a framework catalogue
pub fn catalogued_languages() -> impl Iterator<Item = &'static str> {
    CATALOGUE.iter().map(|(lang, _)| *lang)
}

pub fn is_valid_framework(language: &str, framework: &str) -> bool {
    frameworks_for(language).iter().any(|f| f.name == framework)
}

/// Display label, or the name itself when it is not catalogued
pub fn framework_label<'a>(language: &str, framework: &'a str) -> &'a str {
    frameworks_for(language)
        .iter()
        .find(|f| f.name == framework)
        .map(|f| f.label)
        .unwrap_or(framework)
}

pub fn conversion_targets(source_language: &str) -> &'static [&'static str] {
    CONVERSIONS
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case(source_language))
        .map(|(_, targets)| *targets)
        .unwrap_or(&[])
}

pub fn is_conversion_supported(source_language: &str, target_language: &str) -> bool {
    conversion_targets(source_language)
        .iter()
        .any(|t| t.eq_ignore_ascii_case(target_language))
}
