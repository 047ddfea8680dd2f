use crate::smart_router::ToolCapability;
use herd_core::{HerdError, HerdResult};

/// The built-in belter and drummer capabilities, in registration order.
pub fn standard_capabilities() -> Vec<(&'static str, ToolCapability)> {
    vec![
        (
            "research_belter",
            ToolCapability::new("Research Belter", "Academic research and knowledge synthesis")
                .with_keywords(&[
                    "research", "paper", "academic", "study", "analysis", "literature", "review",
                    "scientific", "journal", "publication",
                ])
                .with_examples(&[
                    "Find research papers about {topic}",
                    "Analyze recent studies on {topic}",
                    "Summarize academic literature about {topic}",
                    "What does research say about {topic}",
                    "Find scientific evidence for {claim}",
                ])
                .with_priority(4),
        ),
        (
            "document_belter",
            ToolCapability::new("Document Belter", "Document processing and content generation")
                .with_keywords(&[
                    "document", "file", "content", "text", "write", "generate", "create", "format",
                    "edit", "process",
                ])
                .with_examples(&[
                    "Create a document about {topic}",
                    "Write a report on {topic}",
                    "Format this {content}",
                    "Generate documentation for {project}",
                    "Process this {file_type} file",
                ])
                .with_priority(3),
        ),
        (
            "finance_belter",
            ToolCapability::new("Finance Belter", "Financial analysis and calculations")
                .with_keywords(&[
                    "finance", "money", "investment", "market", "stock", "price", "cost", "value",
                    "calculate", "analyze",
                ])
                .with_examples(&[
                    "Analyze market trends for {sector}",
                    "Calculate ROI for {investment}",
                    "Evaluate financial metrics for {company}",
                    "Project growth rate for {market}",
                    "Compare investment options for {scenario}",
                ])
                .with_priority(4),
        ),
        (
            "code_belter",
            ToolCapability::new("Code Belter", "Code generation and review")
                .with_keywords(&[
                    "code", "program", "function", "class", "module", "develop", "implement",
                    "debug", "test", "review",
                ])
                .with_examples(&[
                    "Write a function to {task}",
                    "Debug this {language} code",
                    "Implement a class for {purpose}",
                    "Review this code for {criteria}",
                    "Generate tests for {module}",
                ])
                .with_priority(5),
        ),
        (
            "property_belter",
            ToolCapability::new("Property Belter", "Real estate and location analysis")
                .with_keywords(&[
                    "property", "real estate", "location", "area", "market", "house", "apartment",
                    "commercial", "residential", "price",
                ])
                .with_examples(&[
                    "Analyze property values in {location}",
                    "Find market trends for {property_type}",
                    "Evaluate investment potential in {area}",
                    "Compare properties in {region}",
                    "Generate property report for {address}",
                ])
                .with_priority(4),
        ),
        (
            "location_drummer",
            ToolCapability::new("Location Drummer", "Location-based services and mapping")
                .with_keywords(&[
                    "location", "map", "distance", "route", "navigate", "find", "nearby", "place",
                    "address", "directions", "coffee", "restaurant", "shop", "store", "business",
                ])
                .with_examples(&[
                    "Find {business_type} near {location}",
                    "Calculate distance between {points}",
                    "Show route from {start} to {end}",
                    "List amenities near {place}",
                    "Get directions to {destination}",
                    "Find coffee shops near {location}",
                    "Show restaurants around {area}",
                ])
                .with_priority(3),
        ),
        (
            "search_drummer",
            ToolCapability::new("Search Drummer", "Web search and information retrieval")
                .with_keywords(&[
                    "search", "find", "lookup", "information", "web", "google", "bing", "results",
                    "articles", "news",
                ])
                .with_examples(&[
                    "Search for information about {topic}",
                    "Find recent news about {subject}",
                    "Look up {term} online",
                    "Get search results for {query}",
                    "Find websites about {topic}",
                ])
                .with_priority(2),
        ),
        (
            "knowledge_drummer",
            ToolCapability::new("Knowledge Drummer", "Knowledge base and fact retrieval")
                .with_keywords(&[
                    "knowledge", "fact", "information", "definition", "explain", "what is",
                    "how to", "tell me about", "describe", "details",
                ])
                .with_examples(&[
                    "What is {concept}",
                    "Explain how {process} works",
                    "Tell me about {topic}",
                    "Define {term}",
                    "Describe {subject}",
                ])
                .with_priority(2),
        ),
    ]
}

/// Look up one of the built-in capabilities.
pub fn get_capability(tool_id: &str) -> HerdResult<ToolCapability> {
    standard_capabilities()
        .into_iter()
        .find(|(id, _)| *id == tool_id)
        .map(|(_, capability)| capability)
        .ok_or_else(|| HerdError::Routing(format!("No capability defined for tool {tool_id}")))
}
