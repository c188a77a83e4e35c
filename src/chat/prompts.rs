// Prompt templates for the FAQ agent

/// Sent as the first message of every conversation
pub const SYSTEM_MESSAGE: &str = "너는 네이버 스마트스토어 FAQ 상담 챗봇이야.\n\
사용자의 질문에 답하기 전에 반드시 query_engine_tool로 FAQ를 검색하고, 검색된 내용에 근거해서 답변해.\n\
답변은 한국어로 친절하고 간결하게 작성해.\n\
FAQ에서 근거를 찾을 수 없으면 추측하지 말고 모른다고 답해.\n\
스마트스토어와 관련 없는 질문에는 답하지 말고 스마트스토어 관련 질문만 받을 수 있다고 안내해.";

/// First pass of compact-and-refine; placeholders `{context_str}` and `{query_str}`
pub const QA_TEMPLATE: &str = "사용자가 스마트 스토어 FAQ에 질문을 남겼어.\n\
아래는 맥락 정보입니다.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
맥락 정보와 사전 지식을 고려하여 질문에 답변해주세요.\n\
질문: {query_str}\n\
답변:";

/// Later passes; placeholders `{query_str}`, `{existing_answer}` and `{context_msg}`
pub const REFINE_TEMPLATE: &str = "사용자가 스마트 스토어 FAQ에 질문을 남겼어.\n\
원래 질문은 다음과 같아: {query_str}\n\
기존 답변은 다음과 같아: {existing_answer}\n\
우리는 아래의 추가적인 맥락으로 기존 답변을 개선할 수 있어.\n\
------------\n\
{context_msg}\n\
------------\n\
새로운 맥락을 고려하여 원래 답변을 개선하여 질문에 더 나은 답변을 제공해줘.\n\
맥락이 유용하지 않다면 원래 답변을 반환해줘.\n\
개선된 답변:";

/// Emitted when the model answered with nothing but whitespace
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I either wasn't able to understand your question or I don't have an answer for it.";

/// Synthesizer answer when retrieval found nothing
pub const EMPTY_RESPONSE: &str = "Empty Response";

pub const QUERY_ENGINE_TOOL_NAME: &str = "query_engine_tool";

pub const QUERY_ENGINE_TOOL_DESCRIPTION: &str = "Useful for running a natural language query\n\
against a knowledge base and get back a natural language response.";

/// Substitute `{name}` placeholders in a single pass.
///
/// Substituted values are never rescanned, so answers or context that happen to
/// contain `{query_str}` come through untouched. Unknown placeholders are kept.
#[inline]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, from_brace) = rest.split_at(open);
        output.push_str(before);

        let replaced = from_brace.find('}').and_then(|close| {
            let name = from_brace.get(1..close)?;
            let value = vars
                .iter()
                .find_map(|(key, value)| (*key == name).then_some(*value))?;
            Some((value, close))
        });

        if let Some((value, close)) = replaced {
            output.push_str(value);
            rest = from_brace.get(close + 1..).unwrap_or_default();
        } else {
            output.push('{');
            rest = from_brace.get(1..).unwrap_or_default();
        }
    }
    output.push_str(rest);
    output
}

#[inline]
pub fn qa_prompt(context_str: &str, query_str: &str) -> String {
    render_template(
        QA_TEMPLATE,
        &[("context_str", context_str), ("query_str", query_str)],
    )
}

#[inline]
pub fn refine_prompt(query_str: &str, existing_answer: &str, context_msg: &str) -> String {
    render_template(
        REFINE_TEMPLATE,
        &[
            ("query_str", query_str),
            ("existing_answer", existing_answer),
            ("context_msg", context_msg),
        ],
    )
}
